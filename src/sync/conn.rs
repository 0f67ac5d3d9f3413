//! Blocking `ConnectionStateMachine`: owns the transport, drives the login
//! handshake (including redirects), and dispatches commands afterward.

use std::path::Path;

use crate::codec;
use crate::constant::{self, Compression, Endianness, Protocol, State, MAX_REDIRECTS};
use crate::error::{Error, Result};
use crate::error_map;
use crate::handshake::{self, Prompt, Redirect, ResponseInput};
use crate::opts::ConnectOpts;

use super::stream::ByteStream;

pub struct Connection {
    stream: ByteStream,
    protocol: Protocol,
    compression: Compression,
    opts: ConnectOpts,
    state: State,
    /// `false` only for `language=control` over a Unix socket, where the
    /// merovingian control port speaks raw, unframed text read to EOF instead
    /// of MAPI block framing (§4.2).
    framed: bool,
}

enum HandshakeOutcome {
    Ready(Protocol, Compression),
    RetrySameSocket,
    Reconnect(handshake::MonetdbRedirect),
}

impl Connection {
    /// Open a transport and complete the login handshake, following
    /// redirects up to [`MAX_REDIRECTS`] (§4.3, §4.4).
    pub fn connect(opts: ConnectOpts) -> Result<Self> {
        let mut current = opts;
        resolve_transport(&mut current);

        let control_over_unix = current.unix_socket.is_some() && current.language == "control";
        let mut stream = open_transport(&current)?;

        if current.unix_socket.is_some() && !control_over_unix {
            // Prime the socket so the server-side accept loop notices a new
            // client; a plain TCP accept doesn't need this nudge.
            stream.write_all(b"0")?;
            stream.flush()?;
        }

        if control_over_unix {
            return Ok(Connection {
                stream,
                protocol: Protocol::V9,
                compression: Compression::None,
                opts: current,
                state: State::Ready,
                framed: false,
            });
        }

        let mut redirects = 0u32;
        loop {
            if redirects > MAX_REDIRECTS {
                return Err(Error::Operational(format!(
                    "maximal number of redirects reached ({MAX_REDIRECTS})"
                )));
            }

            match attempt_handshake(&mut stream, &current)? {
                HandshakeOutcome::Ready(protocol, compression) => {
                    return Ok(Connection {
                        stream,
                        protocol,
                        compression,
                        opts: current,
                        state: State::Ready,
                        framed: true,
                    });
                }
                HandshakeOutcome::RetrySameSocket => {
                    redirects += 1;
                    tracing::info!(redirects, "merovingian redirect, retrying on same socket");
                }
                HandshakeOutcome::Reconnect(target) => {
                    redirects += 1;
                    tracing::info!(
                        redirects,
                        host = %target.host,
                        port = target.port,
                        "redirected to new server"
                    );
                    current.hostname = target.host;
                    current.port = target.port;
                    current.database = target.database;
                    current.unix_socket = None;
                    stream = open_transport(&current)?;
                }
            }
        }
    }

    /// Send one command and return the server's full response text.
    pub fn cmd(&mut self, text: &str) -> Result<String> {
        if self.state != State::Ready {
            return Err(Error::Programming(
                "cmd() called before the connection finished logging in".to_string(),
            ));
        }
        self.write_message(text.as_bytes())?;
        self.read_response()
    }

    pub fn disconnect(mut self) -> Result<()> {
        self.stream.close().map_err(Error::from)
    }

    /// The options this connection was opened with, reflecting any server
    /// redirect (hostname/port/database may differ from what the caller
    /// originally passed to [`Connection::connect`]).
    pub fn opts(&self) -> &ConnectOpts {
        &self.opts
    }

    fn write_message(&mut self, payload: &[u8]) -> Result<()> {
        if self.framed {
            let wire = codec::encode_block(payload, self.protocol, self.compression)?;
            self.stream.write_all(&wire)?;
        } else {
            self.stream.write_all(payload)?;
        }
        self.stream.flush()
    }

    fn read_block(&mut self) -> Result<Vec<u8>> {
        if self.framed {
            read_framed_block(&mut self.stream, self.protocol, self.compression)
        } else {
            read_until_eof(&mut self.stream)
        }
    }

    /// Interpret one full response payload per §4.4's sentinel classification.
    fn read_response(&mut self) -> Result<String> {
        let payload = self.read_block()?;

        if !self.framed {
            let text = String::from_utf8_lossy(&payload).trim().to_string();
            return Ok(match text.strip_prefix("OK") {
                Some(rest) => rest.trim().to_string(),
                None => text,
            });
        }

        if payload.as_slice() == constant::MSG_MORE {
            self.write_message(b"")?;
            return self.read_response();
        }

        let text = String::from_utf8_lossy(&payload).trim().to_string();
        if text.is_empty() {
            return Ok(text);
        }
        if let Some(rest) = text.strip_prefix("=OK") {
            return Ok(rest.trim().to_string());
        }

        let first = text.as_bytes()[0];
        if first == constant::MSG_ERROR {
            return Err(error_map::handle_error(&text[1..]));
        }
        if text.as_bytes().starts_with(constant::MSG_QUPDATE) {
            for line in text.lines() {
                if let Some(rest) = line.strip_prefix('!') {
                    return Err(error_map::handle_error(rest));
                }
            }
            return Ok(text);
        }
        if [
            constant::MSG_Q,
            constant::MSG_HEADER,
            constant::MSG_NEW_RESULT_HEADER,
            constant::MSG_INITIAL_RESULT_CHUNK,
            constant::MSG_RESULT_CHUNK,
            constant::MSG_TUPLE,
        ]
        .contains(&first)
        {
            return Ok(text);
        }
        if first == constant::MSG_INFO {
            tracing::info!(message = %&text[1..], "server info");
            return Ok(String::new());
        }

        Err(Error::Programming(format!("unknown state: {text}")))
    }
}

/// §4.4 step 1: pick TCP vs Unix socket, folding the well-known
/// `/tmp/.s.monetdb.{port}` path and `hostname`-as-directory conventions in.
fn resolve_transport(opts: &mut ConnectOpts) {
    if opts.unix_socket.is_some() {
        return;
    }
    if let Some(dir) = opts.hostname.strip_prefix('/') {
        let _ = dir;
        opts.unix_socket = Some(format!("{}/.s.monetdb.{}", opts.hostname, opts.port));
        opts.hostname = "localhost".to_string();
        return;
    }
    let well_known = format!("/tmp/.s.monetdb.{}", opts.port);
    if Path::new(&well_known).exists() {
        opts.unix_socket = Some(well_known);
    } else {
        opts.hostname = "localhost".to_string();
    }
}

fn open_transport(opts: &ConnectOpts) -> Result<ByteStream> {
    match &opts.unix_socket {
        #[cfg(unix)]
        Some(path) => ByteStream::connect_unix(path),
        #[cfg(not(unix))]
        Some(_) => Err(Error::Unsupported(
            "Unix domain sockets are not supported on this platform".to_string(),
        )),
        None => ByteStream::connect_tcp(&opts.hostname, opts.port),
    }
}

/// Run one login attempt: read the challenge, send the response, then drain
/// any `#`-info prompts until a terminal `Ready`/`Redirect` arrives.
fn attempt_handshake(stream: &mut ByteStream, opts: &ConnectOpts) -> Result<HandshakeOutcome> {
    let challenge_payload = read_framed_block(stream, Protocol::V9, Compression::None)?;
    let challenge_text = String::from_utf8_lossy(&challenge_payload);
    let challenge_line = challenge_text.trim_end_matches('\n');
    let challenge = handshake::parse_challenge(challenge_line)?;

    let handshake_hostname = if opts.is_localhost() {
        "localhost"
    } else {
        &opts.hostname
    };
    let input = ResponseInput {
        username: &opts.username,
        password: &opts.password,
        language: &opts.language,
        database: &opts.database,
        hostname: handshake_hostname,
        endianness: Endianness::host(),
        blocksize: opts.blocksize,
    };
    let built = handshake::build_response(&challenge, &input)?;

    let wire = codec::encode_block(built.text.as_bytes(), Protocol::V9, Compression::None)?;
    stream.write_all(&wire)?;
    stream.flush()?;

    loop {
        let prompt_payload = read_framed_block(stream, built.protocol, built.compression)?;
        let prompt_text = String::from_utf8_lossy(&prompt_payload)
            .trim_end_matches('\n')
            .to_string();

        match handshake::classify_prompt(&prompt_text)? {
            Prompt::Ready => return Ok(HandshakeOutcome::Ready(built.protocol, built.compression)),
            Prompt::Info(msg) => {
                tracing::info!(%msg, "login info");
            }
            Prompt::Redirect(body) => {
                return match handshake::parse_redirect(&body)? {
                    Redirect::Merovingian => Ok(HandshakeOutcome::RetrySameSocket),
                    Redirect::Monetdb(target) => Ok(HandshakeOutcome::Reconnect(target)),
                };
            }
        }
    }
}

fn read_framed_block(
    stream: &mut ByteStream,
    protocol: Protocol,
    compression: Compression,
) -> Result<Vec<u8>> {
    let hlen = codec::header_len(protocol);
    let mut header = vec![0u8; hlen];
    let mut out = Vec::new();
    loop {
        stream.read_exact(&mut header)?;
        let (len, last) = codec::decode_header(protocol, &header);
        let mut chunk = vec![0u8; len];
        stream.read_exact(&mut chunk)?;
        out.extend_from_slice(&codec::decompress_chunk(&chunk, compression)?);
        if last {
            break;
        }
    }
    Ok(out)
}

/// Control-language-over-Unix framing bypass (§4.2): read until the peer
/// half-closes, one byte at a time since `ByteStream` has no "read whatever
/// is available" primitive.
fn read_until_eof(stream: &mut ByteStream) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        match stream.read_exact(&mut byte) {
            Ok(()) => out.push(byte[0]),
            Err(e) if e.is_transport_closed() => break,
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::DEFAULT_PORT;
    use std::io::Write as _;
    use std::net::TcpListener;
    use std::thread;

    fn spawn_fake_server(
        script: impl FnOnce(std::net::TcpStream) + Send + 'static,
    ) -> (u16, thread::JoinHandle<()>) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            script(socket);
        });
        (port, handle)
    }

    fn write_v9_block(socket: &mut std::net::TcpStream, payload: &[u8]) {
        let wire = codec::encode_block(payload, Protocol::V9, Compression::None).unwrap();
        socket.write_all(&wire).unwrap();
    }

    #[test]
    fn s1_happy_path_login_reaches_ready_state() {
        let (port, handle) = spawn_fake_server(|mut socket| {
            write_v9_block(&mut socket, b"abc:server:9:SHA1:BIG:SHA256\n");
            let mut header = [0u8; 2];
            use std::io::Read;
            socket.read_exact(&mut header).unwrap();
            let (len, _) = codec::decode_header(Protocol::V9, &header);
            let mut buf = vec![0u8; len];
            socket.read_exact(&mut buf).unwrap();
            write_v9_block(&mut socket, b"");
        });

        let opts = ConnectOpts {
            username: "u".to_string(),
            password: "p".to_string(),
            database: "d".to_string(),
            hostname: "127.0.0.1".to_string(),
            port,
            ..ConnectOpts::default()
        };
        let conn = Connection::connect(opts).unwrap();
        assert_eq!(conn.state, State::Ready);
        handle.join().unwrap();
    }

    #[test]
    fn unused_default_port_constant_matches_opts_default() {
        assert_eq!(ConnectOpts::default().port, DEFAULT_PORT);
    }

    #[test]
    fn resolve_transport_leaves_explicit_unix_socket_untouched() {
        let mut opts = ConnectOpts {
            unix_socket: Some("/explicit/path".to_string()),
            ..ConnectOpts::default()
        };
        resolve_transport(&mut opts);
        assert_eq!(opts.unix_socket.as_deref(), Some("/explicit/path"));
    }

    #[test]
    fn resolve_transport_treats_slash_hostname_as_directory() {
        let mut opts = ConnectOpts {
            hostname: "/var/run/monetdb".to_string(),
            port: 50000,
            ..ConnectOpts::default()
        };
        resolve_transport(&mut opts);
        assert_eq!(
            opts.unix_socket.as_deref(),
            Some("/var/run/monetdb/.s.monetdb.50000")
        );
        assert_eq!(opts.hostname, "localhost");
    }

    fn logged_in_pair() -> (Connection, std::net::TcpStream) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            write_v9_block(&mut socket, b"abc:server:9:SHA1:BIG:SHA256\n");
            let mut header = [0u8; 2];
            use std::io::Read;
            socket.read_exact(&mut header).unwrap();
            let (len, _) = codec::decode_header(Protocol::V9, &header);
            let mut buf = vec![0u8; len];
            socket.read_exact(&mut buf).unwrap();
            write_v9_block(&mut socket, b"");
            socket
        });

        let opts = ConnectOpts {
            username: "u".to_string(),
            password: "p".to_string(),
            database: "d".to_string(),
            hostname: "127.0.0.1".to_string(),
            port,
            ..ConnectOpts::default()
        };
        let conn = Connection::connect(opts).unwrap();
        let socket = handle.join().unwrap();
        (conn, socket)
    }

    /// S6: an `&2`-prefixed update response whose body contains an embedded
    /// `!`-line raises a mapped error instead of returning the raw text.
    #[test]
    fn s6_update_response_with_embedded_error_raises() {
        let (mut conn, mut socket) = logged_in_pair();

        let server = thread::spawn(move || {
            let query = {
                let mut header = [0u8; 2];
                use std::io::Read;
                socket.read_exact(&mut header).unwrap();
                let (len, _) = codec::decode_header(Protocol::V9, &header);
                let mut buf = vec![0u8; len];
                socket.read_exact(&mut buf).unwrap();
                buf
            };
            assert_eq!(query, b"sUPDATE t SET x=1;");
            write_v9_block(&mut socket, b"&2 0\n!40000!FK violated\n");
        });

        let err = conn.cmd("sUPDATE t SET x=1;").unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
        server.join().unwrap();
    }

    /// S7: a bare `MSG_MORE` sentinel makes the client send an empty
    /// follow-up block and return whatever the server sends next.
    #[test]
    fn s7_more_input_sentinel_triggers_empty_followup() {
        let (mut conn, mut socket) = logged_in_pair();

        let server = thread::spawn(move || {
            let read_one_block = |socket: &mut std::net::TcpStream| {
                use std::io::Read;
                let mut header = [0u8; 2];
                socket.read_exact(&mut header).unwrap();
                let (len, _) = codec::decode_header(Protocol::V9, &header);
                let mut buf = vec![0u8; len];
                socket.read_exact(&mut buf).unwrap();
                buf
            };

            let query = read_one_block(&mut socket);
            assert_eq!(query, b"sSELECT 1;");
            write_v9_block(&mut socket, constant::MSG_MORE);

            let followup = read_one_block(&mut socket);
            assert_eq!(followup, b"");
            write_v9_block(&mut socket, b"");
        });

        let resp = conn.cmd("sSELECT 1;").unwrap();
        assert_eq!(resp, "");
        server.join().unwrap();
    }
}
