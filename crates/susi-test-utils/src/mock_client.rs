use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// A minimal client over the newline-delimited JSON gateway protocol,
/// for driving the gateway end to end in integration tests.
pub struct MockClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl MockClient {
    pub async fn connect(addr: impl tokio::net::ToSocketAddrs) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer,
        })
    }

    /// Send an arbitrary request object, one line of JSON.
    pub async fn send(&mut self, request: &Value) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(request).expect("request always serializes");
        line.push(b'\n');
        self.writer.write_all(&line).await
    }

    pub async fn subscribe(&mut self, id: i64, key: &str, authlevel: u8) -> std::io::Result<()> {
        self.send(&json!({"id": id, "type": "subscribe", "key": key, "authlevel": authlevel}))
            .await
    }

    pub async fn unsubscribe(&mut self, id: i64, key: &str) -> std::io::Result<()> {
        self.send(&json!({"id": id, "type": "unsubscribe", "key": key}))
            .await
    }

    pub async fn publish(
        &mut self,
        id: i64,
        key: &str,
        payload: Value,
        authlevel: u8,
    ) -> std::io::Result<()> {
        self.send(&json!({"id": id, "type": "publish", "key": key, "payload": payload, "authlevel": authlevel}))
            .await
    }

    /// Read and parse the next newline-delimited JSON frame. Returns
    /// `Ok(None)` at EOF.
    pub async fn recv(&mut self) -> std::io::Result<Option<Value>> {
        let mut line = String::new();
        let bytes_read = self.reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            return Ok(None);
        }
        let value = serde_json::from_str(line.trim_end()).map_err(std::io::Error::other)?;
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn send_writes_one_json_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 256];
            let n = socket.read(&mut buf).await.unwrap();
            String::from_utf8(buf[..n].to_vec()).unwrap()
        });

        let mut client = MockClient::connect(addr).await.unwrap();
        client.subscribe(1, "foo.bar", 3).await.unwrap();

        let received = server.await.unwrap();
        assert!(received.ends_with('\n'));
        let parsed: Value = serde_json::from_str(received.trim_end()).unwrap();
        assert_eq!(parsed["type"], "subscribe");
        assert_eq!(parsed["key"], "foo.bar");
    }

    #[tokio::test]
    async fn recv_returns_none_at_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            // drop immediately, closing the connection.
        });

        let mut client = MockClient::connect(addr).await.unwrap();
        let frame = client.recv().await.unwrap();
        assert!(frame.is_none());
    }
}
