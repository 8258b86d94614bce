//! Destinations for accepted title requests.
//!
//! Every send waits for an acknowledgement so the caller can tell "delivered"
//! from "failed". Failures are reported, never retried here.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::SinkError;
use crate::parse::CandidateEvent;

pub trait EventSink {
    fn send(&mut self, event: &CandidateEvent) -> Result<(), SinkError>;
}

impl<T: EventSink + ?Sized> EventSink for Box<T> {
    fn send(&mut self, event: &CandidateEvent) -> Result<(), SinkError> {
        (**self).send(event)
    }
}

/// Sink selection in the config file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    Webhook {
        url: String,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
    },
    Csv {
        path: PathBuf,
    },
    /// Events only go to the diagnostic log.
    #[default]
    Log,
}

fn default_timeout_ms() -> u64 {
    5000
}

impl SinkConfig {
    pub fn build(&self, device_id: &str) -> Result<Box<dyn EventSink>, SinkError> {
        Ok(match self {
            SinkConfig::Webhook { url, timeout_ms } => {
                Box::new(WebhookSink::new(url, Duration::from_millis(*timeout_ms))?)
            }
            SinkConfig::Csv { path } => {
                let log = CsvEventLog::open(path, device_id)?;
                info!(path = %log.path().display(), "writing events to csv");
                Box::new(log)
            }
            SinkConfig::Log => Box::new(LogSink),
        })
    }
}

/// Body returned by the webhook receiver.
#[derive(Debug, Deserialize)]
struct Ack {
    success: bool,
}

/// POSTs each event as JSON and expects `{"success": true}` back.
pub struct WebhookSink {
    client: reqwest::blocking::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("titlewatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl EventSink for WebhookSink {
    fn send(&mut self, event: &CandidateEvent) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response.text().map_err(|e| SinkError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(SinkError::Rejected(format!("HTTP {}: {}", status, body.trim())));
        }
        parse_ack(&body)?;
        debug!(url = %self.url, kingdom = %event.kingdom, "webhook acknowledged");
        Ok(())
    }
}

fn parse_ack(body: &str) -> Result<(), SinkError> {
    match serde_json::from_str::<Ack>(body) {
        Ok(Ack { success: true }) => Ok(()),
        Ok(Ack { success: false }) => Err(SinkError::Rejected("receiver returned success=false".into())),
        Err(e) => Err(SinkError::Rejected(format!("unreadable acknowledgement: {}", e))),
    }
}

/// CSV header row.
const CSV_HEADER: &str = "timestamp,device,title,kingdom,x,y,isLostKingdom";

/// Append-only CSV of forwarded events.
///
/// The file is opened in append mode for each row, so rows written before a
/// crash are kept.
pub struct CsvEventLog {
    path: PathBuf,
    device_id: String,
}

impl CsvEventLog {
    /// Opens (or creates) the log, writing the header only to an empty file.
    pub fn open(path: &Path, device_id: &str) -> Result<Self, SinkError> {
        init_csv(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            device_id: device_id.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn init_csv(path: &Path) -> Result<(), SinkError> {
    if path.exists() {
        let reader = BufReader::new(File::open(path)?);
        if reader.lines().next().is_some() {
            // File has content, don't overwrite
            return Ok(());
        }
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    writeln!(file, "{}", CSV_HEADER)?;
    Ok(())
}

impl EventSink for CsvEventLog {
    fn send(&mut self, event: &CandidateEvent) -> Result<(), SinkError> {
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;

        // Format: timestamp,device,title,kingdom,x,y,isLostKingdom
        writeln!(
            file,
            "{},{},{},{},{},{},{}",
            Local::now().format("%Y-%m-%dT%H:%M:%S"),
            self.device_id,
            event.title,
            event.kingdom,
            event.x,
            event.y,
            event.is_lost_kingdom,
        )?;
        Ok(())
    }
}

/// Writes each event to the log at info level.
pub struct LogSink;

impl EventSink for LogSink {
    fn send(&mut self, event: &CandidateEvent) -> Result<(), SinkError> {
        info!(
            title = %event.title,
            kingdom = %event.kingdom,
            x = event.x,
            y = event.y,
            lost = event.is_lost_kingdom,
            "title request"
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::parse::Title;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;
    use tempfile::tempdir;

    /// Records events; fails every send while `fail` is set.
    #[derive(Default)]
    pub(crate) struct MemorySink {
        pub sent: Vec<CandidateEvent>,
        pub fail: bool,
    }

    impl EventSink for MemorySink {
        fn send(&mut self, event: &CandidateEvent) -> Result<(), SinkError> {
            if self.fail {
                return Err(SinkError::Transport("connection refused".into()));
            }
            self.sent.push(event.clone());
            Ok(())
        }
    }

    fn event() -> CandidateEvent {
        CandidateEvent {
            title: Title::Architect,
            kingdom: "C12483".into(),
            x: 191,
            y: 262,
            is_lost_kingdom: true,
        }
    }

    /// Serves one HTTP request with the given status and body and returns
    /// the request body it received.
    fn serve_once(status: &'static str, body: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/event", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            let header_end = loop {
                let n = stream.read(&mut chunk).unwrap();
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
            let length: usize = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .map(|v| v.trim().parse().unwrap())
                .unwrap_or(0);
            while buf.len() < header_end + length {
                let n = stream.read(&mut chunk).unwrap();
                buf.extend_from_slice(&chunk[..n]);
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
            String::from_utf8_lossy(&buf[header_end..header_end + length]).to_string()
        });
        (url, handle)
    }

    #[test]
    fn test_webhook_acknowledged() {
        let (url, server) = serve_once("200 OK", r#"{"success": true}"#);
        let mut sink = WebhookSink::new(&url, Duration::from_secs(5)).unwrap();

        sink.send(&event()).unwrap();

        let received: serde_json::Value = serde_json::from_str(&server.join().unwrap()).unwrap();
        assert_eq!(received["title"], "Architect");
        assert_eq!(received["isLostKingdom"], true);
    }

    #[test]
    fn test_webhook_rejected() {
        let (url, server) = serve_once("200 OK", r#"{"success": false}"#);
        let mut sink = WebhookSink::new(&url, Duration::from_secs(5)).unwrap();

        let err = sink.send(&event()).unwrap_err();
        server.join().unwrap();
        assert!(matches!(err, SinkError::Rejected(_)));
    }

    #[test]
    fn test_webhook_http_error() {
        let (url, server) = serve_once("500 Internal Server Error", r#"{"success": true}"#);
        let mut sink = WebhookSink::new(&url, Duration::from_secs(5)).unwrap();

        let err = sink.send(&event()).unwrap_err();
        server.join().unwrap();
        assert!(matches!(err, SinkError::Rejected(_)));
    }

    #[test]
    fn test_webhook_unreachable() {
        // Bind then drop to get a port nothing listens on
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let mut sink = WebhookSink::new(&format!("http://127.0.0.1:{}/", port), Duration::from_secs(2)).unwrap();
        assert!(matches!(sink.send(&event()), Err(SinkError::Transport(_))));
    }

    #[test]
    fn test_parse_ack() {
        assert!(parse_ack(r#"{"success":true}"#).is_ok());
        assert!(parse_ack(r#"{"success":false}"#).is_err());
        assert!(parse_ack("").is_err());
        assert!(parse_ack(r#"{"ok":true}"#).is_err());
    }

    #[test]
    fn test_csv_creates_header_and_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("events.csv");

        let mut sink = CsvEventLog::open(&path, "emulator-5554").unwrap();
        sink.send(&event()).unwrap();
        sink.send(&event()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].ends_with(",emulator-5554,Architect,C12483,191,262,true"));
    }

    #[test]
    fn test_csv_preserves_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.csv");
        std::fs::write(&path, "existing,data\n").unwrap();

        CsvEventLog::open(&path, "dev").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "existing,data\n");
    }

    #[test]
    fn test_sink_config_from_json() {
        let cfg: SinkConfig =
            serde_json::from_str(r#"{"kind":"webhook","url":"http://localhost:5000/chat"}"#).unwrap();
        assert_eq!(
            cfg,
            SinkConfig::Webhook {
                url: "http://localhost:5000/chat".into(),
                timeout_ms: 5000
            }
        );
        let cfg: SinkConfig = serde_json::from_str(r#"{"kind":"log"}"#).unwrap();
        assert_eq!(cfg, SinkConfig::Log);
    }
}
