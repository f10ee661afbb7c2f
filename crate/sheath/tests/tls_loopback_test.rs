use std::io::Write as _;
use std::io::{IoSlice, IoSliceMut};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context as _;
use sheath::metrics::{NoopMetrics, StreamMetrics};
use sheath::security::TlsOptions;
use sheath::stream::tcp::TcpBaseStream;
use sheath::stream::tls::{Role, TlsStream};
use sheath::stream::{Stream, StreamError};
use tempfile::NamedTempFile;

const LONG: Option<Duration> = Some(Duration::from_secs(10));

struct TestCerts {
    server: TlsOptions,
    client: TlsOptions,
    _files: Vec<NamedTempFile>,
}

/// Self-signed certificate for localhost, written out as PEM files the
/// way a deployment would provide them.
fn localhost_certs() -> anyhow::Result<TestCerts> {
    let key = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])?;

    let mut cert_file = NamedTempFile::new()?;
    cert_file.write_all(key.cert.pem().as_bytes())?;
    cert_file.flush()?;

    let mut key_file = NamedTempFile::new()?;
    key_file.write_all(key.key_pair.serialize_pem().as_bytes())?;
    key_file.flush()?;

    let mut ca_file = NamedTempFile::new()?;
    ca_file.write_all(key.cert.pem().as_bytes())?;
    ca_file.flush()?;

    Ok(TestCerts {
        server: TlsOptions {
            cert_file: Some(cert_file.path().to_path_buf()),
            key_file: Some(key_file.path().to_path_buf()),
            ..TlsOptions::default()
        },
        client: TlsOptions {
            ca_file: Some(ca_file.path().to_path_buf()),
            ..TlsOptions::default()
        },
        _files: vec![cert_file, key_file, ca_file],
    })
}

fn spawn_echo_server(
    certs: &TestCerts,
    expect: usize,
) -> anyhow::Result<(u16, thread::JoinHandle<anyhow::Result<()>>)> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    let options = certs.server.clone();

    let handle = thread::spawn(move || -> anyhow::Result<()> {
        let (socket, _) = listener.accept()?;
        let base = TcpBaseStream::new(socket);
        let mut tls = TlsStream::new(base, &options, Role::Server)?;
        assert!(tls.handshake(LONG)?);

        let mut buf = vec![0u8; expect];
        let mut bufs = [IoSliceMut::new(&mut buf)];
        let n = tls.readv(&mut bufs, expect, LONG)?;
        tls.writev(&[IoSlice::new(&buf[..n])], LONG)?;
        tls.flush(LONG)?;
        Ok(())
    });

    Ok((port, handle))
}

fn connect_client(certs: &TestCerts, port: u16) -> anyhow::Result<TlsStream<TcpBaseStream>> {
    let base = TcpBaseStream::connect(("127.0.0.1", port))?;
    let mut tls = TlsStream::new(
        base,
        &certs.client,
        Role::Client {
            server_name: "localhost".to_string(),
        },
    )?;
    assert!(tls.handshake(LONG).context("client handshake")?);
    Ok(tls)
}

#[test]
fn echo_over_tcp_with_fragmented_writes() -> anyhow::Result<()> {
    let _ = env_logger::try_init();
    let certs = localhost_certs()?;

    let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    let (port, server) = spawn_echo_server(&certs, payload.len())?;
    let mut client = connect_client(&certs, port)?;

    client.check_cert("localhost")?;

    // Fragments straddling the coalescing scratch buffer.
    let frags = [
        IoSlice::new(&payload[..10]),
        IoSlice::new(&payload[10..4080]),
        IoSlice::new(&payload[4080..]),
    ];
    let n = client.writev(&frags, LONG)?;
    assert_eq!(n, payload.len());

    let mut echoed = vec![0u8; payload.len()];
    let mut bufs = [IoSliceMut::new(&mut echoed)];
    let n = client.readv(&mut bufs, payload.len(), LONG)?;
    assert_eq!(n, payload.len());
    assert_eq!(echoed, payload);

    client.close()?;
    server.join().unwrap()?;
    Ok(())
}

#[test]
fn check_cert_rejects_wrong_hostname() -> anyhow::Result<()> {
    let _ = env_logger::try_init();
    let certs = localhost_certs()?;
    let (port, server) = spawn_echo_server(&certs, 4)?;
    let mut client = connect_client(&certs, port)?;

    assert!(client.check_cert("not-localhost.example.com").is_err());
    client.check_cert("localhost")?;

    client.write(b"ping", LONG)?;
    let mut buf = [0u8; 4];
    client.read(&mut buf, LONG)?;
    assert_eq!(&buf, b"ping");

    client.close()?;
    server.join().unwrap()?;
    Ok(())
}

#[test]
fn untrusted_server_fails_handshake_unless_weak() -> anyhow::Result<()> {
    let _ = env_logger::try_init();
    let certs = localhost_certs()?;
    let strangers = localhost_certs()?; // independent self-signed CA

    let (port, server) = spawn_echo_server(&certs, 2)?;

    // Client trusting only the unrelated CA must refuse the handshake.
    let distrustful = TestCerts {
        server: certs.server.clone(),
        client: strangers.client.clone(),
        _files: vec![],
    };
    let res = connect_client(&distrustful, port);
    assert!(res.is_err());
    // The server sees its side fail too.
    assert!(server.join().unwrap().is_err());

    // Weak validation talks to it regardless.
    let (port, server) = spawn_echo_server(&certs, 2)?;
    let base = TcpBaseStream::connect(("127.0.0.1", port))?;
    let weak = TlsOptions {
        weak_cert_validation: true,
        ..TlsOptions::default()
    };
    let mut client = TlsStream::new(
        base,
        &weak,
        Role::Client {
            server_name: "localhost".to_string(),
        },
    )?;
    assert!(client.handshake(LONG)?);
    client.check_cert("anything.invalid")?;

    client.write(b"ok", LONG)?;
    let mut buf = [0u8; 2];
    client.read(&mut buf, LONG)?;
    assert_eq!(&buf, b"ok");
    server.join().unwrap()?;
    Ok(())
}

#[test]
fn read_times_out_when_server_is_silent() -> anyhow::Result<()> {
    let _ = env_logger::try_init();
    let certs = localhost_certs()?;
    let (port, server) = spawn_echo_server(&certs, 1)?;
    let mut client = connect_client(&certs, port)?;

    let mut buf = [0u8; 8];
    let mut bufs = [IoSliceMut::new(&mut buf)];
    let err = client
        .readv(&mut bufs, 1, Some(Duration::from_millis(100)))
        .unwrap_err();
    assert!(matches!(err, StreamError::TimedOut));
    assert!(client.should_read());

    // Unblock the echo server so it can exit.
    client.write(b"x", LONG)?;
    let n = client.read(&mut buf, LONG)?;
    assert_eq!(&buf[..n], b"x");
    server.join().unwrap()?;
    Ok(())
}

#[test]
fn default_metrics_sink_is_noop() -> anyhow::Result<()> {
    // NoopMetrics is the default; injecting it explicitly behaves the
    // same and the adapter never requires a real registry.
    let _ = env_logger::try_init();
    let certs = localhost_certs()?;
    let (port, server) = spawn_echo_server(&certs, 3)?;

    let base = TcpBaseStream::connect(("127.0.0.1", port))?;
    let mut client = TlsStream::with_metrics(
        base,
        &certs.client,
        Role::Client {
            server_name: "localhost".to_string(),
        },
        Arc::new(NoopMetrics) as Arc<dyn StreamMetrics>,
    )?;
    assert!(client.handshake(LONG)?);

    client.write(b"abc", LONG)?;
    let mut buf = [0u8; 3];
    client.read(&mut buf, LONG)?;
    assert_eq!(&buf, b"abc");
    server.join().unwrap()?;
    Ok(())
}
