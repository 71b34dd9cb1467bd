//! NSS key log file sink for rustls

use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;
use tlsplit::rustls::KeyLog;

/// Appends `LABEL client_random secret` lines in the format understood by
/// wireshark and other analyzers, enabling offline decryption of captures.
#[derive(Debug)]
pub struct FileKeyLog {
  file: Mutex<File>,
}

impl FileKeyLog {
  /// Open `path` for appending, creating it when missing.
  pub fn append(path: &Path) -> io::Result<Self> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Self {
      file: Mutex::new(file),
    })
  }
}

impl KeyLog for FileKeyLog {
  fn log(&self, label: &str, client_random: &[u8], secret: &[u8]) {
    let mut line =
      String::with_capacity(label.len() + 2 + 2 * (client_random.len() + secret.len()));
    line.push_str(label);
    line.push(' ');
    for byte in client_random {
      let _ = write!(line, "{byte:02x}");
    }
    line.push(' ');
    for byte in secret {
      let _ = write!(line, "{byte:02x}");
    }
    if let Ok(mut file) = self.file.lock() {
      let _ = writeln!(file, "{line}");
    }
  }
}
