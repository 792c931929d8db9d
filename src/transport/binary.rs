//! Binary sentence-protocol backend (TCP port 8728).
//!
//! Words are length-prefixed with the variable 1..5 byte encoding; an empty
//! word terminates a sentence. Replies arrive as `!re` data sentences
//! followed by a single `!done`, or `!trap`/`!fatal` on failure. Login uses
//! the plain post-6.43 `/login` form.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::row::{Row, device_key, normalize_row};
use super::{AddReport, RouterTransport, TransportError};

pub struct BinaryTransport {
    host: String,
    port: u16,
    username: String,
    password: String,
    timeout: Duration,
}

impl BinaryTransport {
    pub fn new(host: &str, port: u16, username: &str, password: &str, timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            port,
            username: username.to_string(),
            password: password.to_string(),
            timeout,
        }
    }

    /// Opens a fresh connection and logs in. Each trait call uses its own
    /// connection; callers already hold the per-router lock.
    async fn connect(&self) -> Result<Connection<TcpStream>, TransportError> {
        let stream = tokio::time::timeout(
            self.timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.timeout))?
        .map_err(|e| TransportError::Connection {
            host: self.host.clone(),
            port: self.port,
            reason: e.to_string(),
        })?;
        let mut conn = Connection {
            stream,
            timeout: self.timeout,
        };
        conn.login(&self.username, &self.password, &self.host)
            .await?;
        Ok(conn)
    }
}

#[async_trait]
impl RouterTransport for BinaryTransport {
    async fn check_connectivity(&self) -> Result<(), TransportError> {
        self.connect().await.map(|_| ())
    }

    async fn get_rows(&self, menu: &str, filter: &Row) -> Result<Vec<Row>, TransportError> {
        let mut conn = self.connect().await?;
        let mut words = vec![format!("{menu}/print")];
        for (key, value) in filter {
            words.push(format!("?{}={}", device_key(key), value));
        }
        match conn.run(&words).await? {
            Reply::Done(rows) => Ok(rows.into_iter().map(normalize_row).collect()),
            Reply::Trap(message) => {
                debug!(menu, message, "read rejected, treating as empty");
                Ok(Vec::new())
            }
        }
    }

    async fn add_rows(&self, menu: &str, rows: &[Row]) -> Result<AddReport, TransportError> {
        let mut conn = self.connect().await?;
        let mut report = AddReport::default();
        for row in rows {
            let mut words = vec![format!("{menu}/add")];
            words.extend(attribute_words(row));
            match conn.run(&words).await? {
                Reply::Done(_) => report.created += 1,
                Reply::Trap(message) => report.record_error(format!("{menu}: {message}")),
            }
        }
        Ok(report)
    }

    async fn edit_row(
        &self,
        menu: &str,
        current: &Row,
        changes: &Row,
    ) -> Result<bool, TransportError> {
        let Some(id) = current.get(".id") else {
            return Ok(false);
        };
        let mut conn = self.connect().await?;
        let mut words = vec![format!("{menu}/set"), format!("=.id={id}")];
        words.extend(attribute_words(changes));
        Ok(matches!(conn.run(&words).await?, Reply::Done(_)))
    }

    async fn remove_rows(&self, menu: &str, filter: &Row) -> Result<u64, TransportError> {
        let targets = self.get_rows(menu, filter).await?;
        let mut conn = self.connect().await?;
        let mut removed = 0;
        for row in targets {
            let Some(id) = row.get(".id") else { continue };
            let words = vec![format!("{menu}/remove"), format!("=.id={id}")];
            if matches!(conn.run(&words).await?, Reply::Done(_)) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exec_command(
        &self,
        command: &str,
        args: &Row,
    ) -> Result<Option<Vec<Row>>, TransportError> {
        let mut conn = self.connect().await?;
        let mut words = vec![command.to_string()];
        words.extend(attribute_words(args));
        match conn.run(&words).await? {
            Reply::Done(rows) => Ok(Some(rows.into_iter().map(normalize_row).collect())),
            Reply::Trap(message) => {
                debug!(command, message, "command rejected");
                Ok(None)
            }
        }
    }
}

fn attribute_words(row: &Row) -> Vec<String> {
    row.iter()
        .map(|(key, value)| format!("={}={}", device_key(key), value))
        .collect()
}

enum Reply {
    Done(Vec<Row>),
    Trap(String),
}

struct Connection<S> {
    stream: S,
    timeout: Duration,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> Connection<S> {
    async fn login(
        &mut self,
        username: &str,
        password: &str,
        host: &str,
    ) -> Result<(), TransportError> {
        let words = vec![
            "/login".to_string(),
            format!("=name={username}"),
            format!("=password={password}"),
        ];
        match self.run(&words).await? {
            Reply::Done(_) => Ok(()),
            Reply::Trap(_) => Err(TransportError::Authentication {
                host: host.to_string(),
            }),
        }
    }

    /// Sends one sentence and reads replies until `!done`.
    async fn run(&mut self, words: &[String]) -> Result<Reply, TransportError> {
        for word in words {
            write_word(&mut self.stream, word.as_bytes()).await?;
        }
        write_word(&mut self.stream, b"").await?;
        self.stream
            .flush()
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        let mut rows = Vec::new();
        let mut trap: Option<String> = None;
        loop {
            let sentence = tokio::time::timeout(self.timeout, read_sentence(&mut self.stream))
                .await
                .map_err(|_| TransportError::Timeout(self.timeout))??;
            let Some((reply, attributes)) = sentence.split_first() else {
                continue;
            };
            match reply.as_str() {
                "!re" => rows.push(attribute_row(attributes)),
                "!done" => {
                    return Ok(match trap {
                        Some(message) => Reply::Trap(message),
                        None => Reply::Done(rows),
                    });
                }
                "!trap" => {
                    let row = attribute_row(attributes);
                    let message = row
                        .get("message")
                        .cloned()
                        .unwrap_or_else(|| "unspecified trap".to_string());
                    trap.get_or_insert(message);
                }
                "!fatal" => {
                    let detail = attributes.first().cloned().unwrap_or_default();
                    return Err(TransportError::Protocol(format!("fatal reply: {detail}")));
                }
                other => {
                    return Err(TransportError::Protocol(format!(
                        "unexpected reply word {other:?}"
                    )));
                }
            }
        }
    }
}

fn attribute_row(words: &[String]) -> Row {
    let mut row = Row::new();
    for word in words {
        let Some(rest) = word.strip_prefix('=') else {
            continue;
        };
        match rest.split_once('=') {
            Some((key, value)) => row.insert(key.to_string(), value.to_string()),
            None => row.insert(rest.to_string(), String::new()),
        };
    }
    row
}

async fn write_word<W: AsyncWrite + Unpin>(writer: &mut W, word: &[u8]) -> Result<(), TransportError> {
    let mut buf = encode_length(word.len() as u32);
    buf.extend_from_slice(word);
    writer
        .write_all(&buf)
        .await
        .map_err(|e| TransportError::Protocol(e.to_string()))
}

async fn read_sentence<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Vec<String>, TransportError> {
    let mut words = Vec::new();
    loop {
        let len = read_length(reader).await?;
        if len == 0 {
            return Ok(words);
        }
        let mut buf = vec![0u8; len as usize];
        reader
            .read_exact(&mut buf)
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        words.push(String::from_utf8_lossy(&buf).into_owned());
    }
}

fn encode_length(len: u32) -> Vec<u8> {
    match len {
        0..=0x7F => vec![len as u8],
        0x80..=0x3FFF => {
            let v = len | 0x8000;
            vec![(v >> 8) as u8, v as u8]
        }
        0x4000..=0x1F_FFFF => {
            let v = len | 0xC0_0000;
            vec![(v >> 16) as u8, (v >> 8) as u8, v as u8]
        }
        0x20_0000..=0x0FFF_FFFF => {
            let v = len | 0xE000_0000;
            vec![(v >> 24) as u8, (v >> 16) as u8, (v >> 8) as u8, v as u8]
        }
        _ => vec![
            0xF0,
            (len >> 24) as u8,
            (len >> 16) as u8,
            (len >> 8) as u8,
            len as u8,
        ],
    }
}

async fn read_length<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u32, TransportError> {
    let first = read_byte(reader).await?;
    let (mut len, extra) = if first < 0x80 {
        (first as u32, 0)
    } else if first & 0xC0 == 0x80 {
        ((first & 0x3F) as u32, 1)
    } else if first & 0xE0 == 0xC0 {
        ((first & 0x1F) as u32, 2)
    } else if first & 0xF0 == 0xE0 {
        ((first & 0x0F) as u32, 3)
    } else if first == 0xF0 {
        (0, 4)
    } else {
        // 0xF1..=0xFF are reserved for control bytes.
        return Err(TransportError::Protocol(format!(
            "reserved length prefix {first:#04x}"
        )));
    };
    for _ in 0..extra {
        len = (len << 8) | read_byte(reader).await? as u32;
    }
    Ok(len)
}

async fn read_byte<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u8, TransportError> {
    let mut buf = [0u8; 1];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| TransportError::Protocol(e.to_string()))?;
    Ok(buf[0])
}
