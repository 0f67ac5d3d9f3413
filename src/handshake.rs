//! Pure logic for the MAPI login handshake (§4.3): challenge parsing, password
//! hash negotiation, response construction, and prompt/redirect classification.
//!
//! Nothing here touches a socket — `sync::conn` and `tokio::conn` each send the
//! built response and feed the server's raw prompt bytes back through
//! [`classify_prompt`]; this module only ever sees `&str`/`&[u8]`.

use crate::constant::{Compression, Endianness, Protocol};
use crate::error::{Error, Result};

/// A parsed login challenge: `salt : identity : protocol_version : hashes_csv : endian : pw_hash_algo`.
#[derive(Debug, Clone)]
pub struct Challenge<'a> {
    pub salt: &'a str,
    pub identity: &'a str,
    pub hashes: Vec<&'a str>,
    pub pw_hash_algo: &'a str,
}

/// Parse the server's login challenge. Only `protocol_version = "9"` is
/// supported; anything else fails immediately (the v10 *framing* width is
/// still supported when negotiated via `PROT10` inside the v9 handshake).
pub fn parse_challenge(raw: &str) -> Result<Challenge<'_>> {
    let fields: Vec<&str> = raw.split(':').collect();
    if fields.len() < 5 {
        return Err(Error::Programming(format!(
            "malformed login challenge: {raw:?}"
        )));
    }
    let salt = fields[0];
    let identity = fields[1];
    let protocol_version = fields[2];
    let hashes_csv = fields[3];

    if protocol_version != "9" {
        return Err(Error::Unsupported("We only speak protocol v9".to_string()));
    }

    let pw_hash_algo = *fields.get(5).ok_or_else(|| {
        Error::Programming(format!("login challenge is missing pw_hash_algo: {raw:?}"))
    })?;

    Ok(Challenge {
        salt,
        identity,
        hashes: hashes_csv.split(',').collect(),
        pw_hash_algo,
    })
}

/// Pre-hash the password with the server-chosen algorithm, returning its hex digest.
fn prehash_password(password: &str, algo: &str) -> Result<String> {
    match algo.to_ascii_uppercase().as_str() {
        "SHA256" => Ok(hex::encode(sha2::Sha256::digest_of(password.as_bytes()))),
        "SHA1" => Ok(hex::encode(sha1::Sha1::digest_of(password.as_bytes()))),
        "MD5" => Ok(hex::encode(md5::Md5::digest_of(password.as_bytes()))),
        other => Err(Error::Unsupported(format!(
            "unknown password pre-hash algorithm: {other}"
        ))),
    }
}

/// Salt and tag the pre-hashed password using the best hash the server offers,
/// in priority order SHA1 then MD5 (§4.3 step 2).
fn salted_hash(pw1: &str, salt: &str, hashes: &[&str]) -> Result<String> {
    if hashes.contains(&"SHA1") {
        let mut input = pw1.as_bytes().to_vec();
        input.extend_from_slice(salt.as_bytes());
        Ok(format!("{{SHA1}}{}", hex::encode(sha1::Sha1::digest_of(&input))))
    } else if hashes.contains(&"MD5") {
        let mut input = pw1.as_bytes().to_vec();
        input.extend_from_slice(salt.as_bytes());
        Ok(format!("{{MD5}}{}", hex::encode(md5::Md5::digest_of(&input))))
    } else {
        Err(Error::Unsupported(format!(
            "no supported password hash offered by server: {hashes:?}"
        )))
    }
}

/// Credentials and session parameters the response is built from; kept
/// separate from the `Connection` struct so this stays I/O-free.
pub struct ResponseInput<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub language: &'a str,
    pub database: &'a str,
    pub hostname: &'a str,
    pub endianness: Endianness,
    pub blocksize: usize,
}

pub struct HandshakeResponse {
    pub text: String,
    pub protocol: Protocol,
    pub compression: Compression,
}

/// Build the login response string and settle on `protocol`/`compression` for
/// the rest of the connection (§4.3 steps 1-5).
pub fn build_response(challenge: &Challenge<'_>, input: &ResponseInput<'_>) -> Result<HandshakeResponse> {
    let pw1 = prehash_password(input.password, challenge.pw_hash_algo)?;
    let pwhash = salted_hash(&pw1, challenge.salt, &challenge.hashes)?;

    // The reference client hardcodes "BIG" for the base (non-PROT10) response
    // regardless of actual host endianness; only the PROT10 upgrade path uses
    // the real endianness tag. This looks like an oversight in the original
    // but we reproduce it exactly — see DESIGN.md.
    let mut fields = vec![
        "BIG".to_string(),
        input.username.to_string(),
        pwhash,
        input.language.to_string(),
        input.database.to_string(),
    ];

    let mut protocol = Protocol::V9;
    let mut compression = Compression::None;

    if challenge.hashes.contains(&"PROT10") {
        protocol = Protocol::V10;
        fields[0] = input.endianness.tag().to_string();

        if input.hostname != "localhost"
            && challenge.hashes.contains(&"COMPRESSION_SNAPPY")
            && snappy_available()
        {
            compression = Compression::Snappy;
        }

        fields.push("PROT10".to_string());
        fields.push(compression.tag().to_string());
        fields.push(input.blocksize.to_string());
    }

    let text = fields.join(":") + ":";
    Ok(HandshakeResponse {
        text,
        protocol,
        compression,
    })
}

#[cfg(feature = "snappy")]
fn snappy_available() -> bool {
    true
}

#[cfg(not(feature = "snappy"))]
fn snappy_available() -> bool {
    false
}

/// The server's classification of the post-login prompt (§4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    /// Empty prompt or `=OK`: login accepted.
    Ready,
    /// `#...`: informational message, forwarded to the logger, still accepted.
    Info(String),
    /// `^scheme:rest...`: server wants the client to reconnect elsewhere.
    Redirect(String),
}

/// Classify a trimmed login prompt. A `!` prompt is a hard login failure and
/// is raised directly rather than returned, since callers never need to
/// inspect it further.
pub fn classify_prompt(prompt: &str) -> Result<Prompt> {
    if prompt.is_empty() || prompt == "=OK" {
        return Ok(Prompt::Ready);
    }
    if let Some(rest) = prompt.strip_prefix('#') {
        return Ok(Prompt::Info(rest.to_string()));
    }
    if let Some(rest) = prompt.strip_prefix('!') {
        return Err(Error::Database(rest.to_string()));
    }
    if let Some(rest) = prompt.strip_prefix('^') {
        return Ok(Prompt::Redirect(rest.to_string()));
    }
    Err(Error::Programming(format!("unknown state: {prompt}")))
}

/// A parsed `monetdb://HOST:PORT/DB` redirect target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonetdbRedirect {
    pub host: String,
    pub port: u16,
    pub database: String,
}

/// Classification of a `^`-prefixed redirect body, after taking the first
/// whitespace-delimited token (§4.3).
pub enum Redirect {
    /// Same socket, restart the handshake from scratch.
    Merovingian,
    /// Reconnect elsewhere, credentials preserved.
    Monetdb(MonetdbRedirect),
}

/// Parse a redirect body (the text after `^`). Only the first
/// whitespace-delimited token is meaningful; the rest is advisory.
///
/// The token always carries a leading `mapi` component (e.g.
/// `mapi:monetdb://h2:50001/db2`) that identifies the URI family rather than
/// the redirect kind; the actual scheme is the *second* colon-separated
/// field, matching the reference client's `prompt.split()[0][1:].split(':')`.
pub fn parse_redirect(body: &str) -> Result<Redirect> {
    let token = body.split_whitespace().next().unwrap_or(body);
    let parts: Vec<&str> = token.split(':').collect();
    let scheme = *parts.get(1).ok_or_else(|| {
        Error::Programming(format!("unknown redirect: {body}"))
    })?;

    match scheme {
        "merovingian" => Ok(Redirect::Merovingian),
        "monetdb" => parse_monetdb_redirect(&parts, body).map(Redirect::Monetdb),
        _ => Err(Error::Programming(format!("unknown redirect: {body}"))),
    }
}

/// `parts` is the full `:`-split token, e.g. `["mapi", "monetdb", "//h2", "50001/db2"]`.
fn parse_monetdb_redirect(parts: &[&str], body: &str) -> Result<MonetdbRedirect> {
    let host = parts
        .get(2)
        .and_then(|s| s.strip_prefix("//"))
        .ok_or_else(|| Error::Programming(format!("unknown redirect: {body}")))?;
    let port_and_db = parts
        .get(3)
        .ok_or_else(|| Error::Programming(format!("unknown redirect: {body}")))?;
    let (port, database) = port_and_db.split_once('/').ok_or_else(|| {
        Error::Programming(format!("unknown redirect: {body}"))
    })?;
    let port: u16 = port
        .parse()
        .map_err(|_| Error::Programming(format!("unknown redirect: {body}")))?;

    Ok(MonetdbRedirect {
        host: host.to_string(),
        port,
        database: database.to_string(),
    })
}

/// Thin `Digest`-style helpers so `prehash_password`/`salted_hash` read as one
/// call each rather than `new(); update(); finalize()` triples.
trait DigestOnce {
    fn digest_of(data: &[u8]) -> Vec<u8>;
}

impl DigestOnce for sha2::Sha256 {
    fn digest_of(data: &[u8]) -> Vec<u8> {
        use sha2::Digest;
        sha2::Sha256::digest(data).to_vec()
    }
}

impl DigestOnce for sha1::Sha1 {
    fn digest_of(data: &[u8]) -> Vec<u8> {
        use sha1::Digest;
        sha1::Sha1::digest(data).to_vec()
    }
}

impl DigestOnce for md5::Md5 {
    fn digest_of(data: &[u8]) -> Vec<u8> {
        use md5::Digest;
        md5::Md5::digest(data).to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_v9_happy_path_response_is_byte_identical() {
        let challenge = parse_challenge("abc:server:9:SHA1:BIG:SHA256").unwrap();
        let input = ResponseInput {
            username: "u",
            password: "p",
            language: "sql",
            database: "d",
            hostname: "db.example.com",
            endianness: Endianness::Big,
            blocksize: 1_000_000,
        };
        let response = build_response(&challenge, &input).unwrap();
        assert_eq!(response.protocol, Protocol::V9);
        assert_eq!(response.compression, Compression::None);

        let pw1 = hex::encode(sha2::Sha256::digest_of(b"p"));
        let mut salted_input = pw1.into_bytes();
        salted_input.extend_from_slice(b"abc");
        let expected_hash = format!("{{SHA1}}{}", hex::encode(sha1::Sha1::digest_of(&salted_input)));
        assert_eq!(response.text, format!("BIG:u:{expected_hash}:sql:d:"));
    }

    #[test]
    fn challenge_response_is_deterministic() {
        let challenge = parse_challenge("abc:server:9:SHA1:BIG:SHA256").unwrap();
        let input = ResponseInput {
            username: "u",
            password: "p",
            language: "sql",
            database: "d",
            hostname: "db.example.com",
            endianness: Endianness::Big,
            blocksize: 1_000_000,
        };
        let a = build_response(&challenge, &input).unwrap().text;
        let b = build_response(&challenge, &input).unwrap().text;
        assert_eq!(a, b);
    }

    #[test]
    fn s2_prot10_with_snappy_over_non_localhost() {
        let challenge = parse_challenge("s:x:9:SHA1,PROT10,COMPRESSION_SNAPPY:LIT:SHA1").unwrap();
        let input = ResponseInput {
            username: "u",
            password: "p",
            language: "sql",
            database: "d",
            hostname: "remote.example.com",
            endianness: Endianness::Little,
            blocksize: 1_000_000,
        };
        let response = build_response(&challenge, &input).unwrap();
        assert_eq!(response.protocol, Protocol::V10);
        #[cfg(feature = "snappy")]
        {
            assert_eq!(response.compression, Compression::Snappy);
            assert!(response.text.ends_with(":PROT10:COMPRESSION_SNAPPY:1000000:"));
            assert!(response.text.starts_with("LIT:u:"));
        }
    }

    #[test]
    fn s3_prot10_offered_but_localhost_disables_compression() {
        let challenge = parse_challenge("s:x:9:SHA1,PROT10,COMPRESSION_SNAPPY:LIT:SHA1").unwrap();
        let input = ResponseInput {
            username: "u",
            password: "p",
            language: "sql",
            database: "d",
            hostname: "localhost",
            endianness: Endianness::Little,
            blocksize: 1_000_000,
        };
        let response = build_response(&challenge, &input).unwrap();
        assert_eq!(response.protocol, Protocol::V10);
        assert_eq!(response.compression, Compression::None);
        assert!(response.text.ends_with(":PROT10:COMPRESSION_NONE:1000000:"));
    }

    #[test]
    fn rejects_non_v9_protocol() {
        let err = parse_challenge("s:x:10:SHA1:LIT:SHA1").unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn classify_prompt_variants() {
        assert_eq!(classify_prompt("").unwrap(), Prompt::Ready);
        assert_eq!(classify_prompt("=OK").unwrap(), Prompt::Ready);
        assert_eq!(
            classify_prompt("#starting up").unwrap(),
            Prompt::Info("starting up".to_string())
        );
        assert!(matches!(classify_prompt("!nope").unwrap_err(), Error::Database(m) if m == "nope"));
        assert!(matches!(classify_prompt("garbage").unwrap_err(), Error::Programming(_)));
    }

    #[test]
    fn s5_parses_monetdb_redirect() {
        match parse_redirect("mapi:monetdb://h2:50001/db2").unwrap() {
            Redirect::Monetdb(target) => {
                assert_eq!(target.host, "h2");
                assert_eq!(target.port, 50001);
                assert_eq!(target.database, "db2");
            }
            Redirect::Merovingian => panic!("expected monetdb redirect"),
        }
    }

    #[test]
    fn parses_merovingian_redirect() {
        assert!(matches!(
            parse_redirect("mapi:merovingian:proxy").unwrap(),
            Redirect::Merovingian
        ));
    }

    #[test]
    fn unknown_redirect_scheme_is_programming_error() {
        let err = parse_redirect("mapi:ftp://x").unwrap_err();
        assert!(matches!(err, Error::Programming(_)));
    }
}
