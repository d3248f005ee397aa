//! Client Service Loop
//!
//! Accepts framed requests from clients and registering nodes and
//! dispatches them to the operation handlers. One task per connection; a
//! connection carries any number of request/reply exchanges.

use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use parley_cluster::wire::{read_frame, write_frame, ClientReply, ClientRequest};
use parley_cluster::Operations;
use parley_common::prelude::*;

/// Accept connections until the token is cancelled.
pub async fn serve(
    listener: TcpListener,
    ops: Arc<Operations>,
    max_frame_size: usize,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("service loop stopped");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let ops = ops.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, ops, max_frame_size, cancel).await {
                            debug!(%peer, error = %e, "connection closed with error");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    ops: Arc<Operations>,
    max_frame_size: usize,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let request: ClientRequest = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = read_frame(&mut stream, max_frame_size) => match read {
                Ok(request) => request,
                // Client hung up between requests
                Err(Error::Io(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(())
                }
                Err(e) => return Err(e),
            }
        };
        let reply = dispatch(&ops, request).await;
        write_frame(&mut stream, &reply, max_frame_size).await?;
    }
}

async fn dispatch(ops: &Operations, request: ClientRequest) -> ClientReply {
    match request {
        ClientRequest::RegisterUser { username, password } => {
            ClientReply::Op(ops.register_user(&username, &password).await)
        }
        ClientRequest::Login { username, password } => {
            ClientReply::Op(ops.login(&username, &password).await)
        }
        ClientRequest::CreateChatroom { name, owner } => {
            ClientReply::Op(ops.create_chatroom(&name, &owner).await)
        }
        ClientRequest::DeleteChatroom { name, requester } => {
            ClientReply::Op(ops.delete_chatroom(&name, &requester).await)
        }
        ClientRequest::GetChatroom { name } => ClientReply::Op(ops.get_chatroom(&name).await),
        ClientRequest::ListChatrooms => ClientReply::Rooms(ops.list_chatrooms().await),
        ClientRequest::ReestablishChatroom { name } => {
            ClientReply::Op(ops.reestablish_chatroom(&name).await)
        }
        ClientRequest::RegisterDataNode {
            host,
            ops_port,
            participant_port,
        } => ClientReply::Registered {
            operations_port: ops.register_data_node(&host, ops_port, participant_port),
        },
        ClientRequest::RegisterChatNode { host, port } => ClientReply::Registered {
            operations_port: ops.register_chat_node(&host, port),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_cluster::{
        Cleaner, InMemoryRpc, NodeRegistry, Placement, TwoPhaseEngine, TxnCoordinator,
    };
    use std::time::Duration;

    fn test_ops(rpc: Arc<InMemoryRpc>) -> Arc<Operations> {
        let registry = Arc::new(NodeRegistry::new());
        let coordinator = Arc::new(TxnCoordinator::new());
        let engine = Arc::new(TwoPhaseEngine::new(
            coordinator.clone(),
            rpc.clone(),
            TwoPhaseConfig::default(),
        ));
        let cleaner = Arc::new(Cleaner::new(
            registry.clone(),
            rpc.clone(),
            SweepConfig {
                interval: Duration::from_secs(60),
                probe_timeout: Duration::from_millis(100),
            },
        ));
        let placement = Arc::new(Placement::new(registry.clone(), rpc.clone(), cleaner));
        Arc::new(Operations::new(
            registry, coordinator, engine, placement, rpc, 7000,
        ))
    }

    #[tokio::test]
    async fn test_serve_round_trip_over_tcp() {
        let rpc = Arc::new(InMemoryRpc::new());
        let ops = test_ops(rpc.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();

        let server_cancel = cancel.clone();
        let server = tokio::spawn(serve(listener, ops, 1024 * 1024, server_cancel));

        let mut stream = TcpStream::connect(addr).await.unwrap();

        // Register a chat node, then list rooms (empty cluster)
        write_frame(
            &mut stream,
            &ClientRequest::RegisterChatNode {
                host: "chat-1".into(),
                port: 9000,
            },
            1024 * 1024,
        )
        .await
        .unwrap();
        match read_frame::<_, ClientReply>(&mut stream, 1024 * 1024).await.unwrap() {
            ClientReply::Registered { operations_port } => assert_eq!(operations_port, 7000),
            other => panic!("unexpected reply: {:?}", other),
        }

        write_frame(&mut stream, &ClientRequest::ListChatrooms, 1024 * 1024)
            .await
            .unwrap();
        match read_frame::<_, ClientReply>(&mut stream, 1024 * 1024).await.unwrap() {
            ClientReply::Rooms(rooms) => assert!(rooms.is_empty()),
            other => panic!("unexpected reply: {:?}", other),
        }

        drop(stream);
        cancel.cancel();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_domain_failure_is_a_reply_not_a_disconnect() {
        let rpc = Arc::new(InMemoryRpc::new());
        let ops = test_ops(rpc);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve(listener, ops, 1024 * 1024, cancel.clone()));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(
            &mut stream,
            &ClientRequest::Login {
                username: "al:ice".into(),
                password: "pw".into(),
            },
            1024 * 1024,
        )
        .await
        .unwrap();

        match read_frame::<_, ClientReply>(&mut stream, 1024 * 1024).await.unwrap() {
            ClientReply::Op(reply) => {
                assert!(!reply.is_ok());
                assert!(reply.message.contains("must not contain"));
            }
            other => panic!("unexpected reply: {:?}", other),
        }

        cancel.cancel();
        server.await.unwrap();
    }
}
