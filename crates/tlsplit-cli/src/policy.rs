//! Static single-downstream policy wired to file-backed JSON writers

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tlsplit::rustls::{ClientConfig, ServerConfig};
use tlsplit::{Addr, ConnInfo, DataReceiver, LogLevel, LogRecord, LogReceiver, Policy, Result};

/// Record appended to the data log for each captured chunk.
#[derive(Serialize)]
struct DataRecord<'a> {
  level: LogLevel,
  direction: &'static str,
  /// base64 of the captured bytes
  data: String,
  #[serde(flatten)]
  conn_info: &'a ConnInfo,
}

/// Append-only JSON-lines writer shared across handler tasks.
pub struct JsonLineWriter {
  file: Mutex<File>,
  tee_stdout: bool,
}

impl JsonLineWriter {
  /// Open `path` for appending, creating it when missing.
  pub fn append(path: &Path, tee_stdout: bool) -> io::Result<Self> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Self {
      file: Mutex::new(file),
      tee_stdout,
    })
  }

  fn write(&self, value: &impl Serialize) {
    let Ok(line) = serde_json::to_string(value) else {
      return;
    };
    if self.tee_stdout {
      println!("{line}");
    }
    if let Ok(mut file) = self.file.lock() {
      let _ = writeln!(file, "{line}");
    }
  }
}

/// Policy behind `tlsplit run`: one fixed downstream, one certificate, and
/// JSON-lines sinks for log and data records.
pub struct StaticPolicy {
  downstream: Addr,
  proxy_tls: Arc<ServerConfig>,
  downstream_tls: Arc<ClientConfig>,
  log_writer: Arc<JsonLineWriter>,
  data_writer: Option<Arc<JsonLineWriter>>,
}

impl StaticPolicy {
  pub fn new(
    downstream: Addr,
    proxy_tls: Arc<ServerConfig>,
    downstream_tls: Arc<ClientConfig>,
    log_writer: Arc<JsonLineWriter>,
    data_writer: Option<Arc<JsonLineWriter>>,
  ) -> Self {
    Self {
      downstream,
      proxy_tls,
      downstream_tls,
      log_writer,
      data_writer,
    }
  }

  fn write_data(&self, direction: &'static str, info: &ConnInfo, data: &Bytes) {
    if let Some(writer) = &self.data_writer {
      writer.write(&DataRecord {
        level: LogLevel::Data,
        direction,
        data: BASE64.encode(data),
        conn_info: info,
      });
    }
  }
}

#[async_trait]
impl Policy for StaticPolicy {
  async fn resolve_downstream(&self, _proxy: &Addr, _victim: &Addr) -> Result<Option<Addr>> {
    Ok(Some(self.downstream.clone()))
  }

  async fn proxy_tls_config(
    &self,
    _victim: &Addr,
    _proxy: &Addr,
    _downstream: Option<&Addr>,
  ) -> Result<Arc<ServerConfig>> {
    Ok(self.proxy_tls.clone())
  }

  async fn downstream_tls_config(
    &self,
    _victim: &Addr,
    _proxy: &Addr,
    _downstream: &Addr,
  ) -> Result<Arc<ClientConfig>> {
    Ok(self.downstream_tls.clone())
  }

  fn log_receiver(&self) -> Option<&dyn LogReceiver> {
    Some(self)
  }

  fn data_receiver(&self) -> Option<&dyn DataReceiver> {
    self.data_writer.as_ref().map(|_| self as &dyn DataReceiver)
  }
}

impl LogReceiver for StaticPolicy {
  fn recv_log(&self, record: LogRecord) {
    self.log_writer.write(&record);
  }
}

impl DataReceiver for StaticPolicy {
  fn recv_victim_data(&self, info: ConnInfo, data: Bytes) {
    self.write_data("victim", &info, &data);
  }

  fn recv_downstream_data(&self, info: ConnInfo, data: Bytes) {
    self.write_data("downstream", &info, &data);
  }
}
