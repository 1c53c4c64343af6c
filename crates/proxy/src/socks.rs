use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const SOCKS_VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Failures of the raw CONNECT path. The display strings for the reply codes
/// deliberately use the canonical proxy error phrases so the shared
/// connection-failure classifier recognizes them.
#[derive(Debug, Error)]
pub enum SocksError {
    #[error("proxy io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ETIMEDOUT connecting to {host}:{port}")]
    Timeout { host: String, port: u16 },

    #[error("General SOCKS server failure")]
    GeneralFailure,

    #[error("connection not allowed by ruleset")]
    NotAllowed,

    #[error("Network is unreachable")]
    NetworkUnreachable,

    #[error("Host unreachable")]
    HostUnreachable,

    #[error("ECONNREFUSED: destination refused the connection")]
    ConnectionRefused,

    #[error("TTL expired")]
    TtlExpired,

    #[error("Socks5 proxy rejected the request (code {0})")]
    Rejected(u8),

    #[error("malformed SOCKS reply")]
    Protocol,
}

impl SocksError {
    fn from_reply_code(code: u8) -> Self {
        match code {
            0x01 => SocksError::GeneralFailure,
            0x02 => SocksError::NotAllowed,
            0x03 => SocksError::NetworkUnreachable,
            0x04 => SocksError::HostUnreachable,
            0x05 => SocksError::ConnectionRefused,
            0x06 => SocksError::TtlExpired,
            other => SocksError::Rejected(other),
        }
    }
}

/// RFC 1928 CONNECT request with a domain address, so name resolution happens
/// inside the proxy (required for onion hosts).
fn encode_connect_request(host: &str, port: u16) -> Vec<u8> {
    let host_bytes = host.as_bytes();
    let mut buf = Vec::with_capacity(7 + host_bytes.len());
    buf.push(SOCKS_VERSION);
    buf.push(CMD_CONNECT);
    buf.push(0x00);
    buf.push(ATYP_DOMAIN);
    buf.push(host_bytes.len().min(255) as u8);
    buf.extend_from_slice(&host_bytes[..host_bytes.len().min(255)]);
    buf.extend_from_slice(&port.to_be_bytes());
    buf
}

/// How many bytes of bound address follow the 4-byte reply header.
fn bound_addr_len(atyp: u8, first_len_byte: u8) -> Result<usize, SocksError> {
    match atyp {
        ATYP_IPV4 => Ok(4),
        ATYP_DOMAIN => Ok(1 + first_len_byte as usize),
        ATYP_IPV6 => Ok(16),
        _ => Err(SocksError::Protocol),
    }
}

/// Open a raw TCP connection to `host:port` through the SOCKS5 proxy at
/// `proxy_addr`. Returns the stream positioned right after the handshake,
/// ready for the destination's bytes.
pub async fn tcp_connect(
    proxy_addr: &str,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<TcpStream, SocksError> {
    let fut = handshake(proxy_addr, host, port);
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(SocksError::Timeout {
            host: host.to_string(),
            port,
        }),
    }
}

async fn handshake(proxy_addr: &str, host: &str, port: u16) -> Result<TcpStream, SocksError> {
    let mut stream = TcpStream::connect(proxy_addr).await?;

    stream
        .write_all(&[SOCKS_VERSION, 1, METHOD_NO_AUTH])
        .await?;
    let mut method = [0u8; 2];
    stream.read_exact(&mut method).await?;
    if method[0] != SOCKS_VERSION || method[1] != METHOD_NO_AUTH {
        return Err(SocksError::Rejected(method[1]));
    }

    stream.write_all(&encode_connect_request(host, port)).await?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await?;
    if reply[0] != SOCKS_VERSION {
        return Err(SocksError::Protocol);
    }
    if reply[1] != 0x00 {
        return Err(SocksError::from_reply_code(reply[1]));
    }

    // Drain the bound address + port; callers only need the stream.
    let mut len_byte = [0u8; 1];
    let addr_len = if reply[3] == ATYP_DOMAIN {
        stream.read_exact(&mut len_byte).await?;
        bound_addr_len(reply[3], len_byte[0])? - 1
    } else {
        bound_addr_len(reply[3], 0)?
    };
    let mut rest = vec![0u8; addr_len + 2];
    stream.read_exact(&mut rest).await?;

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_connect_request() {
        let req = encode_connect_request("example.onion", 8333);
        assert_eq!(&req[..4], &[0x05, 0x01, 0x00, 0x03]);
        assert_eq!(req[4] as usize, "example.onion".len());
        assert_eq!(&req[5..5 + 13], b"example.onion");
        assert_eq!(&req[18..], &8333u16.to_be_bytes());
    }

    #[test]
    fn test_bound_addr_len() {
        assert_eq!(bound_addr_len(ATYP_IPV4, 0).unwrap(), 4);
        assert_eq!(bound_addr_len(ATYP_IPV6, 0).unwrap(), 16);
        assert_eq!(bound_addr_len(ATYP_DOMAIN, 12).unwrap(), 13);
        assert!(bound_addr_len(0x07, 0).is_err());
    }

    #[test]
    fn test_reply_codes_map_to_classifiable_errors() {
        use darkmap_core::is_connection_failure;
        assert!(is_connection_failure(
            &SocksError::from_reply_code(0x01).to_string()
        ));
        assert!(is_connection_failure(
            &SocksError::from_reply_code(0x04).to_string()
        ));
        assert!(is_connection_failure(
            &SocksError::from_reply_code(0x05).to_string()
        ));
        assert!(is_connection_failure(
            &SocksError::Timeout {
                host: "x".into(),
                port: 80
            }
            .to_string()
        ));
    }
}
