//! A single producer-side connection to a beanstalkd broker.

use crate::{
    Error, Options, PutParams, Result,
    proto::{self, DEFAULT_TUBE},
};
use bytes::BytesMut;
use std::{io, sync::Arc};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream},
    net::TcpStream,
    time::timeout,
};

/// Longest reply line accepted from the broker, terminator included. The
/// longest valid reply is `USING` followed by a maximal tube name.
const MAX_REPLY_LINE_LEN: usize = 256;

/// An open connection plus the tube it currently `use`s.
///
/// Every exchange is bounded by [`Options::read_write_timeout`]. After any
/// error for which [`Error::is_connection_error`] holds, the stream may be
/// mid-reply and the connection must be discarded.
pub(crate) struct Connection {
    stream: BufStream<TcpStream>,
    tube: String,
    write_buf: BytesMut,
    line: String,
    options: Options,
}

impl Connection {
    /// Opens a TCP connection to `endpoint` within
    /// [`Options::connect_timeout`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if the address cannot be resolved, the
    /// broker refuses the connection, or the attempt times out.
    pub(crate) async fn connect(endpoint: &str, options: Options) -> Result<Self> {
        let connect_err = |source: io::Error| Error::Connect {
            endpoint: endpoint.to_string(),
            source: Arc::new(source),
        };

        let stream = match timeout(options.connect_timeout, TcpStream::connect(endpoint)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(connect_err(e)),
            Err(_) => {
                return Err(connect_err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no connection after {:?}", options.connect_timeout),
                )));
            }
        };
        stream.set_nodelay(true).map_err(connect_err)?;

        Ok(Self {
            stream: BufStream::new(stream),
            tube: DEFAULT_TUBE.to_string(),
            write_buf: BytesMut::with_capacity(1024),
            line: String::with_capacity(64),
            options,
        })
    }

    /// Submits one job, switching tubes first if needed.
    pub(crate) async fn put(&mut self, tube: &str, body: &[u8], params: &PutParams) -> Result<u64> {
        let limit = self.options.read_write_timeout;
        match timeout(limit, self.exchange(tube, body, params)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                context: format!("put to tube {tube:?} took longer than {limit:?}"),
            }),
        }
    }

    async fn exchange(&mut self, tube: &str, body: &[u8], params: &PutParams) -> Result<u64> {
        if self.tube != tube {
            proto::encode_use(&mut self.write_buf, tube);
            self.flush().await?;
            let line = self.read_line().await?;
            proto::parse_use_response(line, tube)?;
            tube.clone_into(&mut self.tube);
        }

        proto::encode_put(&mut self.write_buf, params, body);
        self.flush().await?;
        let line = self.read_line().await?;
        proto::parse_put_response(line)
    }

    async fn flush(&mut self) -> Result<()> {
        let buf = self.write_buf.split();
        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads one reply line without its trailing `\r\n`.
    ///
    /// Lines longer than [`MAX_REPLY_LINE_LEN`] are rejected as unexpected.
    async fn read_line(&mut self) -> Result<&str> {
        self.line.clear();
        let read = (&mut self.stream)
            .take(MAX_REPLY_LINE_LEN as u64)
            .read_line(&mut self.line)
            .await?;
        if !self.line.ends_with('\n') {
            if read == MAX_REPLY_LINE_LEN {
                return Err(Error::UnexpectedResponse {
                    line: format!("reply line exceeds {MAX_REPLY_LINE_LEN} bytes"),
                });
            }
            return Err(Error::ConnectionClosed);
        }

        Ok(self.line.trim_end_matches(['\r', '\n']))
    }

    /// Closes the write half so the broker sees a clean end of stream.
    pub(crate) async fn close(mut self) {
        if let Err(_e) = self.stream.shutdown().await {
            #[cfg(feature = "tracing")]
            tracing::debug!("Error closing connection: {_e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBroker;
    use core::time::Duration;

    #[tokio::test]
    async fn use_is_only_sent_when_tube_changes() {
        let broker = FakeBroker::start().await;
        let mut conn = Connection::connect(&broker.endpoint(), Options::default())
            .await
            .unwrap();
        let params = PutParams::default();

        conn.put("default", b"a", &params).await.unwrap();
        conn.put("emails", b"b", &params).await.unwrap();
        conn.put("emails", b"c", &params).await.unwrap();
        conn.put("default", b"d", &params).await.unwrap();

        let commands = broker.commands();
        let uses: Vec<_> = commands.iter().filter(|c| c.starts_with("use ")).collect();
        assert_eq!(uses, ["use emails", "use default"]);
        assert_eq!(commands.iter().filter(|c| c.starts_with("put ")).count(), 4);
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        let endpoint = FakeBroker::unreachable_endpoint().await;
        let err = Connection::connect(&endpoint, Options::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Connect { endpoint: e, .. } if e == endpoint));
    }

    #[tokio::test]
    async fn broker_hangup_is_reported() {
        let broker = FakeBroker::start().await;
        let mut conn = Connection::connect(&broker.endpoint(), Options::default())
            .await
            .unwrap();

        let err = conn
            .put("default", FakeBroker::HANG_UP, &PutParams::default())
            .await
            .unwrap_err();
        assert!(err.is_connection_error(), "{err:?}");
    }

    #[tokio::test]
    async fn slow_broker_times_out() {
        let broker = FakeBroker::with_delay(Duration::from_millis(500)).await;
        let options = Options {
            read_write_timeout: Duration::from_millis(50),
            ..Options::default()
        };
        let mut conn = Connection::connect(&broker.endpoint(), options).await.unwrap();

        let err = conn
            .put("default", b"slow", &PutParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn endless_reply_line_is_rejected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        let broker = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(&[b'x'; 4096]).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut conn = Connection::connect(&endpoint, Options::default())
            .await
            .unwrap();
        let err = conn
            .put("default", b"body", &PutParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedResponse { .. }), "{err:?}");
        assert!(err.is_connection_error());

        broker.abort();
    }
}
