use std::cell::RefCell;
use std::future::Future;
use std::os::fd::AsRawFd;
use std::rc::Rc;

use log::{debug, error, info};

use crate::net::{BoundAddr, Endpoint, Listener, Stream};
use crate::runtime::{self, JoinHandle};
use crate::sync::Counter;
use crate::{Error, Result};

/// Application hooks driving a [`Server`].
///
/// Only [`connection`](ServerContext::connection) is required; the
/// remaining hooks observe the server lifecycle.
pub trait ServerContext: 'static {
    /// Handles one client connection. Runs as a detached task; errors are
    /// logged at the dispatch boundary and never terminate the server.
    fn connection(&self, client: Stream) -> impl Future<Output = Result<()>>;

    /// Backlog handed to `listen(2)`.
    fn backlog(&self) -> i32 {
        libc::SOMAXCONN
    }

    /// Called once the server is listening.
    fn listen(&self, addr: &BoundAddr) {
        let _ = addr;
    }

    /// Called when the accept loop has terminated, before draining.
    fn shutdown(&self) {}

    /// Called once every connection handler has returned.
    fn close(&self) {}
}

/// Owns a bound socket, accepts clients, and dispatches each to the
/// context's handler as a detached task.
///
/// ```no_run
/// use netio::net::{Server, ServerContext, Stream};
///
/// struct Echo;
///
/// impl ServerContext for Echo {
///     async fn connection(&self, client: Stream) -> netio::Result<()> {
///         let mut buf = [0; 1024];
///
///         loop {
///             let read = client.read(&mut buf).await?;
///             if read == 0 {
///                 return Ok(());
///             }
///
///             client.write_all(&buf[..read]).await?;
///         }
///     }
/// }
///
/// netio::run(async {
///     let server = Server::new(Echo);
///     server.listen(&"/tmp/echo.sock".into()).await
/// })
/// .unwrap()
/// .unwrap();
/// ```
pub struct Server<C> {
    context: Rc<C>,
    connections: Counter,
    listener: RefCell<Option<Rc<Listener>>>,
}

impl<C: ServerContext> Server<C> {
    pub fn new(context: C) -> Server<C> {
        Server {
            context: Rc::new(context),
            connections: Counter::new(),
            listener: RefCell::new(None),
        }
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    /// Binds to `endpoint` and serves until [`close`](Server::close) is
    /// called or the listener is canceled, then waits for every
    /// outstanding connection task to finish.
    ///
    /// A Unix socket file is removed on the way out.
    pub async fn listen(&self, endpoint: &Endpoint) -> Result<()> {
        let listener = Rc::new(Listener::bind(endpoint, self.context.backlog())?);
        *self.listener.borrow_mut() = Some(Rc::clone(&listener));

        self.context.listen(listener.local_addr());

        let result = self.accept_loop(&listener).await;

        *self.listener.borrow_mut() = None;
        self.context.shutdown();

        if self.connections.count() > 0 {
            info!(
                "waiting for {} connection(s) on {}",
                self.connections.count(),
                listener.local_addr(),
            );
        }

        self.connections.join().await;
        self.context.close();

        if let BoundAddr::Unix(path) = listener.local_addr() {
            if std::fs::remove_file(path).is_ok() {
                debug!("removed socket file {:?}", path);
            }
        }

        result
    }

    async fn accept_loop(&self, listener: &Listener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok(Some(client)) => self.dispatch(client),
                Ok(None) => return Ok(()),
                Err(Error::Canceled) => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }

    fn dispatch(&self, client: Stream) {
        debug!("client ({}) connected", client.as_raw_fd());

        let guard = self.connections.increment();
        let context = Rc::clone(&self.context);

        runtime::spawn(async move {
            let _guard = guard;

            if let Err(err) = context.connection(client).await {
                error!("client connection closed: {}", err);
            }
        });
    }

    /// Stops accepting connections. The `listen` future completes once
    /// the in-flight handlers have drained.
    pub fn close(&self) {
        if let Some(listener) = &*self.listener.borrow() {
            listener.close();
        }
    }

    /// Number of connection handlers still running.
    pub fn connections(&self) -> u32 {
        self.connections.count()
    }

    /// True while the accept loop owns a bound socket.
    pub fn listening(&self) -> bool {
        self.listener.borrow().is_some()
    }

    /// The bound address, while listening.
    pub fn address(&self) -> Option<BoundAddr> {
        self.listener
            .borrow()
            .as_ref()
            .map(|listener| listener.local_addr().clone())
    }
}

impl<C> std::fmt::Debug for Server<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("listening", &self.listener.borrow().is_some())
            .field("connections", &self.connections.count())
            .finish()
    }
}

/// A group of servers, one per endpoint.
///
/// Binding failures are reported to the error handler instead of aborting
/// the whole group; the group fails only when no endpoint could be bound.
pub struct ServerList<C: ServerContext> {
    entries: Vec<ServerEntry<C>>,
}

struct ServerEntry<C: ServerContext> {
    server: Rc<Server<C>>,
    task: JoinHandle<Result<()>>,
}

impl<C: ServerContext> std::fmt::Debug for ServerList<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerList")
            .field("servers", &self.entries.len())
            .field("listening", &self.listening())
            .finish()
    }
}

impl<C: ServerContext> ServerList<C> {
    /// Builds one server per configuration via `factory` and starts them.
    ///
    /// `factory` returns the server and the endpoint it should listen on;
    /// `on_error` receives each configuration that failed to bind.
    pub async fn listen<E, F, H>(
        configs: &[E],
        mut factory: F,
        mut on_error: H,
    ) -> Result<ServerList<C>>
    where
        F: FnMut(&E) -> (Server<C>, Endpoint),
        H: FnMut(&E, &Error),
    {
        let mut entries = Vec::with_capacity(configs.len());

        for config in configs {
            let (server, endpoint) = factory(config);
            let server = Rc::new(server);

            let task = runtime::spawn({
                let server = Rc::clone(&server);
                async move { server.listen(&endpoint).await }
            });

            // Give the listen task one turn to bind.
            runtime::yield_now().await;

            if server.listening() {
                entries.push(ServerEntry { server, task });
                continue;
            }

            if let Err(err) = task.await {
                on_error(config, &err);
            }
        }

        if entries.is_empty() {
            return Err(Error::Io(std::io::Error::other(
                "failed to listen for connections",
            )));
        }

        Ok(ServerList { entries })
    }

    /// Stops accepting on every constituent server.
    pub fn close(&self) {
        for entry in &self.entries {
            entry.server.close();
        }
    }

    /// Total connection handlers still running.
    pub fn connections(&self) -> u32 {
        self.entries
            .iter()
            .map(|entry| entry.server.connections())
            .sum()
    }

    /// Number of servers currently listening.
    pub fn listening(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.server.listening())
            .count()
    }

    /// Waits for every server's `listen` future; returns the first error.
    pub async fn join(self) -> Result<()> {
        let mut result = Ok(());

        for entry in self.entries {
            let joined = entry.task.await;

            if result.is_ok() {
                result = joined;
            }
        }

        result
    }
}
