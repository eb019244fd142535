use crate::net::{Endpoint, Stream};
use crate::pool::{Pool, PoolItem, PoolOptions, Provide};
use crate::Result;

/// Builds pooled connections to one endpoint.
#[derive(Debug)]
pub struct Connector {
    endpoint: Endpoint,
}

impl Provide for Connector {
    type Item = Stream;

    async fn provide(&self) -> Result<Stream> {
        Stream::connect(self.endpoint.clone()).await
    }

    fn checkin(&self, stream: &mut Stream) -> bool {
        !stream.failed()
    }

    fn checkout(&self, stream: &mut Stream) -> bool {
        !stream.peer_closed().unwrap_or(true)
    }
}

/// A pooled client for one endpoint.
///
/// `connect` hands out an open [`Stream`], reusing idle connections whose
/// peer has not gone away. Connections whose `failed` flag is set are not
/// recycled.
///
/// ```no_run
/// use netio::net::Client;
/// use netio::pool::PoolOptions;
///
/// netio::run(async {
///     let client = Client::new("localhost:4000", PoolOptions::default());
///
///     let stream = client.connect().await?;
///     stream.write_all(b"ping").await
/// })
/// .unwrap()
/// .unwrap();
/// ```
pub struct Client {
    pool: Pool<Connector>,
}

impl Client {
    pub fn new<E>(endpoint: E, options: PoolOptions) -> Client
    where
        E: Into<Endpoint>,
    {
        Client {
            pool: Pool::new(
                Connector {
                    endpoint: endpoint.into(),
                },
                options,
            ),
        }
    }

    /// The endpoint this client connects to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.pool.provider().endpoint
    }

    /// Checks a connection out of the pool, dialing a fresh one as needed.
    pub async fn connect(&self) -> Result<PoolItem<Connector>> {
        self.pool.checkout().await
    }

    /// Open connections, pooled or checked out.
    pub fn connections(&self) -> usize {
        self.pool.size()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.pool.provider().endpoint)
            .field("connections", &self.pool.size())
            .finish()
    }
}
