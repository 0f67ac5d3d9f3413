//! Async `ConnectionStateMachine`, mirroring [`crate::sync::Connection`]
//! field for field. The codec, handshake and error-map modules are shared
//! verbatim; only the I/O-touching outer loop is reimplemented here.

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
    framed: bool,
}

enum HandshakeOutcome {
    Ready(Protocol, Compression),
    RetrySameSocket,
    Reconnect(handshake::MonetdbRedirect),
}

impl Connection {
    pub async fn connect(opts: ConnectOpts) -> Result<Self> {
        let mut current = opts;
        resolve_transport(&mut current);

        let control_over_unix = current.unix_socket.is_some() && current.language == "control";
        let mut stream = open_transport(&current).await?;

        if current.unix_socket.is_some() && !control_over_unix {
            stream.write_all(b"0").await?;
            stream.flush().await?;
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

            match attempt_handshake(&mut stream, &current).await? {
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
                    stream = open_transport(&current).await?;
                }
            }
        }
    }

    pub async fn cmd(&mut self, text: &str) -> Result<String> {
        if self.state != State::Ready {
            return Err(Error::Programming(
                "cmd() called before the connection finished logging in".to_string(),
            ));
        }
        self.write_message(text.as_bytes()).await?;
        self.read_response().await
    }

    pub async fn disconnect(mut self) -> Result<()> {
        self.stream.close().await
    }

    /// The options this connection was opened with, reflecting any server
    /// redirect (hostname/port/database may differ from what the caller
    /// originally passed to [`Connection::connect`]).
    pub fn opts(&self) -> &ConnectOpts {
        &self.opts
    }

    async fn write_message(&mut self, payload: &[u8]) -> Result<()> {
        if self.framed {
            let wire = codec::encode_block(payload, self.protocol, self.compression)?;
            self.stream.write_all(&wire).await?;
        } else {
            self.stream.write_all(payload).await?;
        }
        self.stream.flush().await
    }

    async fn read_block(&mut self) -> Result<Vec<u8>> {
        if self.framed {
            read_framed_block(&mut self.stream, self.protocol, self.compression).await
        } else {
            read_until_eof(&mut self.stream).await
        }
    }

    /// Interpret one full response payload per §4.4's sentinel classification.
    async fn read_response(&mut self) -> Result<String> {
        let payload = self.read_block().await?;

        if !self.framed {
            let text = String::from_utf8_lossy(&payload).trim().to_string();
            return Ok(match text.strip_prefix("OK") {
                Some(rest) => rest.trim().to_string(),
                None => text,
            });
        }

        if payload.as_slice() == constant::MSG_MORE {
            self.write_message(b"").await?;
            return Box::pin(self.read_response()).await;
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

async fn open_transport(opts: &ConnectOpts) -> Result<ByteStream> {
    match &opts.unix_socket {
        #[cfg(unix)]
        Some(path) => ByteStream::connect_unix(path).await,
        #[cfg(not(unix))]
        Some(_) => Err(Error::Unsupported(
            "Unix domain sockets are not supported on this platform".to_string(),
        )),
        None => ByteStream::connect_tcp(&opts.hostname, opts.port).await,
    }
}

async fn attempt_handshake(stream: &mut ByteStream, opts: &ConnectOpts) -> Result<HandshakeOutcome> {
    let challenge_payload = read_framed_block(stream, Protocol::V9, Compression::None).await?;
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
    stream.write_all(&wire).await?;
    stream.flush().await?;

    loop {
        let prompt_payload = read_framed_block(stream, built.protocol, built.compression).await?;
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

async fn read_framed_block(
    stream: &mut ByteStream,
    protocol: Protocol,
    compression: Compression,
) -> Result<Vec<u8>> {
    let hlen = codec::header_len(protocol);
    let mut header = vec![0u8; hlen];
    let mut out = Vec::new();
    loop {
        stream.read_exact(&mut header).await?;
        let (len, last) = codec::decode_header(protocol, &header);
        let mut chunk = vec![0u8; len];
        stream.read_exact(&mut chunk).await?;
        out.extend_from_slice(&codec::decompress_chunk(&chunk, compression)?);
        if last {
            break;
        }
    }
    Ok(out)
}

/// Control-language-over-Unix framing bypass (§4.2): read until the peer
/// half-closes.
async fn read_until_eof(stream: &mut ByteStream) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        match stream.read_exact(&mut byte).await {
            Ok(()) => out.push(byte[0]),
            Err(e) if e.is_transport_closed() => break,
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}
