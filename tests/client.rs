use std::rc::Rc;

use netio::io::BufReader;
use netio::net::{Client, Endpoint, Server, ServerContext, Stream, UnixEndpoint};
use netio::pool::PoolOptions;
use netio::Error;

mod util;
use util::{run, temp_file};

/// Serves any number of increment requests on one connection.
struct IncrementLoop;

impl ServerContext for IncrementLoop {
    async fn connection(&self, client: Stream) -> netio::Result<()> {
        let mut reader = BufReader::new(&client);

        loop {
            let mut buf = [0u8; 4];

            match reader.read_exact(&mut buf).await {
                Ok(()) => {}
                Err(Error::Eof) => return Ok(()),
                Err(err) => return Err(err),
            }

            let number = i32::from_le_bytes(buf) + 1;
            client.write_all(&number.to_le_bytes()).await?;
        }
    }
}

async fn roundtrip(stream: &Stream, number: i32) -> i32 {
    stream.write_all(&number.to_le_bytes()).await.unwrap();

    let mut reader = BufReader::new(stream);
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).await.unwrap();

    i32::from_le_bytes(buf)
}

#[test]
fn pooled_client_reuses_a_connection() {
    let path = temp_file("client_reuse");

    run(async move {
        let server = Rc::new(Server::new(IncrementLoop));

        let listen = netio::spawn({
            let server = Rc::clone(&server);
            let endpoint = Endpoint::Unix(UnixEndpoint::new(&path));
            async move { server.listen(&endpoint).await }
        });

        netio::yield_now().await;

        let client = Client::new(
            Endpoint::Unix(UnixEndpoint::new(&path)),
            PoolOptions::default(),
        );

        {
            let stream = client.connect().await.unwrap();
            assert_eq!(roundtrip(&stream, 1).await, 2);
        }

        {
            let stream = client.connect().await.unwrap();
            assert_eq!(roundtrip(&stream, 10).await, 11);
        }

        // Both requests went over one pooled connection.
        assert_eq!(client.connections(), 1);

        server.close();

        // Dropping the pool closes the cached connection, letting the
        // server-side handler drain.
        drop(client);

        listen.await.unwrap();
    });
}

#[test]
fn closed_connections_are_not_recycled() {
    let path = temp_file("client_redial");

    run(async move {
        let server = Rc::new(Server::new(IncrementLoop));

        let listen = netio::spawn({
            let server = Rc::clone(&server);
            let endpoint = Endpoint::Unix(UnixEndpoint::new(&path));
            async move { server.listen(&endpoint).await }
        });

        netio::yield_now().await;

        let client = Client::new(
            Endpoint::Unix(UnixEndpoint::new(&path)),
            PoolOptions::default(),
        );

        {
            let stream = client.connect().await.unwrap();
            assert_eq!(roundtrip(&stream, 1).await, 2);

            // Sever the connection before it goes back to the pool.
            stream.shutdown(std::net::Shutdown::Both).unwrap();
        }

        // Let the peer's close make it through.
        netio::yield_now().await;

        let stream = client.connect().await.unwrap();
        assert_eq!(roundtrip(&stream, 5).await, 6);

        drop(stream);
        server.close();
        drop(client);
        listen.await.unwrap();
    });
}
