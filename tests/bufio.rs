use rand::Rng;

use netio::io::{BufReader, BufWriter};
use netio::net::Stream;

mod util;
use util::run;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

#[test]
fn chunked_reads_concatenate_to_the_input() {
    run(async {
        let (reader_end, writer_end) = Stream::pair().unwrap();

        let data = pattern(64 * 1024);

        let writer = netio::spawn({
            let data = data.clone();
            async move {
                writer_end.write_all(&data).await.unwrap();
                drop(writer_end);
            }
        });

        let mut reader = BufReader::with_capacity(509, &reader_end);
        let mut collected = Vec::with_capacity(data.len());
        let mut rng = rand::rng();

        while collected.len() < data.len() {
            let remaining = data.len() - collected.len();
            let chunk = rng.random_range(1..=usize::min(2048, remaining));

            let mut buf = vec![0; chunk];
            reader.read_exact(&mut buf).await.unwrap();
            collected.extend_from_slice(&buf);
        }

        assert_eq!(collected, data);
        writer.await;
    });
}

#[test]
fn read_some_returns_buffered_bytes() {
    run(async {
        let (reader_end, writer_end) = Stream::pair().unwrap();

        writer_end.write_all(b"hello world").await.unwrap();

        let mut reader = BufReader::new(&reader_end);
        let bytes = reader.read_some().await.unwrap().to_vec();

        assert_eq!(bytes, b"hello world");
    });
}

#[test]
fn read_at_most_caps_the_slice() {
    run(async {
        let (reader_end, writer_end) = Stream::pair().unwrap();

        writer_end.write_all(b"abcdef").await.unwrap();

        let mut reader = BufReader::new(&reader_end);

        assert_eq!(reader.read_at_most(4).await.unwrap(), b"abcd");
        assert_eq!(reader.read_at_most(4).await.unwrap(), b"ef");
    });
}

#[test]
fn done_probes_without_suspending() {
    run(async {
        let (reader_end, writer_end) = Stream::pair().unwrap();
        let mut reader = BufReader::new(&reader_end);

        // Nothing to read, stream open: not done.
        assert!(!reader.done().unwrap());

        writer_end.write_all(b"x").await.unwrap();
        assert!(!reader.done().unwrap());

        // The probe buffered the byte; it is not lost.
        assert_eq!(reader.read_some().await.unwrap(), b"x");

        drop(writer_end);
        assert!(reader.done().unwrap());
    });
}

#[test]
fn eof_in_the_middle_of_read_exact() {
    run(async {
        let (reader_end, writer_end) = Stream::pair().unwrap();

        writer_end.write_all(&[0xAA, 0xBB]).await.unwrap();
        drop(writer_end);

        let mut reader = BufReader::new(&reader_end);
        let mut buf = [0u8; 4];

        assert!(matches!(
            reader.read_exact(&mut buf).await,
            Err(netio::Error::Eof)
        ));
        assert_eq!(&buf[..2], &[0xAA, 0xBB]);
    });
}

#[test]
fn writer_buffers_until_flush() {
    run(async {
        let (reader_end, writer_end) = Stream::pair().unwrap();

        let mut writer = BufWriter::new(&writer_end);
        writer.write(b"ping").await.unwrap();

        // Nothing has hit the socket yet.
        let mut probe = [0u8; 8];
        assert!(reader_end.try_read(&mut probe).unwrap().is_none());

        writer.flush().await.unwrap();

        let read = reader_end.read(&mut probe).await.unwrap();
        assert_eq!(&probe[..read], b"ping");
    });
}

#[test]
fn large_write_bypasses_the_buffer() {
    run(async {
        let (reader_end, writer_end) = Stream::pair().unwrap();

        let data = pattern(4096);

        let writer = netio::spawn({
            let data = data.clone();
            async move {
                // Capacity far below the payload forces the direct path.
                let mut writer = BufWriter::with_capacity(64, &writer_end);
                writer.write(&data).await.unwrap();
                writer.flush().await.unwrap();
                drop(writer);
                drop(writer_end);
            }
        });

        let mut reader = BufReader::new(&reader_end);
        let mut buf = vec![0; data.len()];
        reader.read_exact(&mut buf).await.unwrap();

        assert_eq!(buf, data);
        writer.await;
    });
}

#[test]
fn try_flush_reports_pending_io() {
    run(async {
        let (reader_end, writer_end) = Stream::pair().unwrap();

        let mut writer = BufWriter::with_capacity(1024, &writer_end);
        writer.write(b"abc").await.unwrap();

        // A socket with room: the buffer drains in one pass.
        assert!(!writer.try_flush().unwrap());

        let mut probe = [0u8; 8];
        let read = reader_end.read(&mut probe).await.unwrap();
        assert_eq!(&probe[..read], b"abc");
    });
}
