use cabinet_bridge::codec::PacketCodec;
use cabinet_bridge::mailbox::Mailbox;
use cabinet_bridge::transport::{self, TransportSettings};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{self, Instant};

fn free_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

fn test_settings() -> TransportSettings {
    TransportSettings {
        receive_addr: free_addr(),
        send_addr: free_addr(),
        receive_sleep: Duration::from_millis(5),
        send_sleep: Duration::from_millis(1),
        recycle_after: 500,
        connect_timeout: Duration::from_millis(500),
    }
}

async fn wait_for(mut ready: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if ready() {
            return true;
        }
        time::sleep(Duration::from_millis(5)).await;
    }
    ready()
}

/// Fake peer that serves `batch` to the first connection and nothing after.
async fn serve_once(addr: SocketAddr, batch: Vec<u8>) {
    let listener = TcpListener::bind(addr).await.unwrap();
    tokio::spawn(async move {
        let mut pending = Some(batch);
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            if let Some(batch) = pending.take() {
                let _ = stream.write_all(&batch).await;
            }
            let _ = stream.shutdown().await;
        }
    });
}

/// Fake peer that serves one batch per connection, in order, then nothing.
async fn serve_in_order(addr: SocketAddr, batches: Vec<Vec<u8>>) {
    let listener = TcpListener::bind(addr).await.unwrap();
    tokio::spawn(async move {
        let mut queue = batches.into_iter();
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            if let Some(batch) = queue.next() {
                let _ = stream.write_all(&batch).await;
            }
            let _ = stream.shutdown().await;
        }
    });
}

async fn drain_send_port(addr: SocketAddr) -> Vec<u8> {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if let Ok(mut stream) = TcpStream::connect(addr).await {
            let mut batch = Vec::new();
            if stream.read_to_end(&mut batch).await.is_ok() {
                return batch;
            }
        }
        assert!(Instant::now() < deadline, "send port never came up");
        time::sleep(Duration::from_millis(5)).await;
    }
}

#[cfg(test)]
mod transport_tests {
    use super::*;

    #[tokio::test]
    async fn test_receive_loop_publishes_peer_batch() {
        let settings = test_settings();
        let batch =
            PacketCodec::encode_inbound(0x11, &[0xAA, 0xBB, 0xCC, 0xDD, 0x00, 0x01]).unwrap();
        serve_once(settings.receive_addr, batch.clone()).await;

        let inbound = Mailbox::new();
        let handle = transport::spawn(settings, inbound.clone(), Mailbox::new());

        assert!(wait_for(|| !inbound.is_empty()).await);
        assert_eq!(inbound.take(), Some(batch));
        assert!(handle.stats().batches_received >= 1);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_receive_loop_waits_for_empty_mailbox() {
        let settings = test_settings();
        let batch = vec![0x01, 0x00];
        serve_once(settings.receive_addr, batch.clone()).await;

        let inbound = Mailbox::new();
        inbound.offer(vec![0xEE]).unwrap();
        let handle = transport::spawn(settings, inbound.clone(), Mailbox::new());

        // The peer batch is held back until the consumer empties the slot.
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(inbound.take(), Some(vec![0xEE]));

        assert!(wait_for(|| !inbound.is_empty()).await);
        assert_eq!(inbound.take(), Some(batch));

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_send_loop_delivers_staged_batch_once() {
        let settings = test_settings();
        let send_addr = settings.send_addr;
        let outbound = Mailbox::new();
        let batch = PacketCodec::encode_outbound(0x00, &[]).unwrap();
        outbound.offer(batch.clone()).unwrap();

        let handle = transport::spawn(settings, Mailbox::new(), outbound.clone());

        assert_eq!(drain_send_port(send_addr).await, batch);
        assert!(wait_for(|| outbound.is_empty()).await);

        // Nothing staged: the connection is closed without data.
        assert!(drain_send_port(send_addr).await.is_empty());

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_unreachable_peer_counts_errors_and_keeps_running() {
        let mut settings = test_settings();
        settings.recycle_after = 2;
        settings.receive_sleep = Duration::from_millis(1);

        let handle = transport::spawn(settings, Mailbox::new(), Mailbox::new());

        assert!(wait_for(|| {
            let stats = handle.stats();
            stats.socket_errors >= 3 && stats.recycles >= 1
        })
        .await);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_slow_peer_batch_arrives_whole() {
        let mut settings = test_settings();
        settings.connect_timeout = Duration::from_millis(500);
        let listener = TcpListener::bind(settings.receive_addr).await.unwrap();

        let batch =
            PacketCodec::encode_inbound(0x11, &[0xAA, 0xBB, 0xCC, 0xDD, 0x00, 0x01]).unwrap();
        let (head, tail) = batch.split_at(7);
        let (head, tail) = (head.to_vec(), tail.to_vec());
        tokio::spawn(async move {
            let mut first = true;
            while let Ok((mut stream, _)) = listener.accept().await {
                if first {
                    first = false;
                    let _ = stream.write_all(&head).await;
                    time::sleep(Duration::from_millis(700)).await;
                    let _ = stream.write_all(&tail).await;
                }
                let _ = stream.shutdown().await;
            }
        });

        let inbound = Mailbox::new();
        let handle = transport::spawn(settings, inbound.clone(), Mailbox::new());

        assert!(wait_for(|| !inbound.is_empty()).await);
        assert_eq!(inbound.take(), Some(batch));
        let stats = handle.stats();
        assert_eq!(stats.batches_received, 1);
        assert_eq!(stats.socket_errors, 0);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_recycling_receive_loop_keeps_every_batch_once() {
        let mut settings = test_settings();
        settings.recycle_after = 1;
        let batches: Vec<Vec<u8>> = (1..=4u8)
            .map(|n| PacketCodec::encode_inbound(0x11, &[0, 0, 0, n, 0x00, n]).unwrap())
            .collect();
        serve_in_order(settings.receive_addr, batches.clone()).await;

        let inbound = Mailbox::new();
        let handle = transport::spawn(settings, inbound.clone(), Mailbox::new());

        // Let the loop recycle while a batch waits in the occupied mailbox.
        time::sleep(Duration::from_millis(50)).await;
        for expected in &batches {
            assert!(wait_for(|| !inbound.is_empty()).await);
            assert_eq!(inbound.take().as_ref(), Some(expected));
            time::sleep(Duration::from_millis(20)).await;
        }

        time::sleep(Duration::from_millis(100)).await;
        assert!(inbound.is_empty());
        let stats = handle.stats();
        assert_eq!(stats.batches_received, 4);
        assert!(stats.recycles >= 4);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_recycling_send_loop_delivers_each_batch_once() {
        let mut settings = test_settings();
        settings.recycle_after = 1;
        let send_addr = settings.send_addr;
        let outbound = Mailbox::new();
        let handle = transport::spawn(settings, Mailbox::new(), outbound.clone());

        for n in 1..=3u8 {
            let batch = PacketCodec::encode_outbound(0x13, &[0, 0, 0, n, 0x00, 0x20]).unwrap();
            outbound.offer(batch.clone()).unwrap();

            let mut received = drain_send_port(send_addr).await;
            while received.is_empty() {
                received = drain_send_port(send_addr).await;
            }
            assert_eq!(received, batch);
            assert!(outbound.is_empty());
        }

        assert!(drain_send_port(send_addr).await.is_empty());
        let stats = handle.stats();
        assert_eq!(stats.batches_sent, 3);
        assert!(stats.recycles >= 3);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_stop_returns_promptly() {
        let handle = transport::spawn(test_settings(), Mailbox::new(), Mailbox::new());
        time::sleep(Duration::from_millis(20)).await;

        time::timeout(Duration::from_secs(2), handle.stop())
            .await
            .expect("transport did not stop");
    }
}
