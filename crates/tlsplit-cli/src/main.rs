//! tlsplit command-line front end
//!
//! `tlsplit run` points the interception engine at a single fixed
//! downstream and writes logs, captured data, and NSS key log material to
//! files. `tlsplit pem` generates a self-signed certificate pair for use
//! with `run` or other tooling.

mod keylog;
mod policy;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use keylog::FileKeyLog;
use policy::{JsonLineWriter, StaticPolicy};
use std::fs::File;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tlsplit::cert::SelfSignedCert;
use tlsplit::rustls::ServerConfig;
use tlsplit::{Addr, ProxyServer};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tlsplit", version, about = "TLS-aware intercepting TCP proxy")]
struct Cli {
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Run the intercepting proxy
  Run(RunArgs),
  /// Generate a self-signed certificate and write it as a PEM pair
  Pem(PemArgs),
}

#[derive(Args)]
struct RunArgs {
  /// Socket the proxy server will listen on, e.g. 192.168.1.86:443
  #[arg(short = 'l', long)]
  listen_addr: String,

  /// Socket the proxy will send traffic to, e.g. 192.168.1.250:443
  #[arg(short = 'd', long)]
  downstream_addr: String,

  /// File to write JSON log records to
  #[arg(short = 'x', long, default_value = "tlsplit.log")]
  log_file: PathBuf,

  /// File to receive intercepted data in JSON format (takes precedence
  /// over --data-to-log)
  #[arg(short = 'o', long)]
  data_log_file: Option<PathBuf>,

  /// Send intercepted data to the log file instead of --data-log-file
  #[arg(short = 'y', long)]
  data_to_log: bool,

  /// File to receive NSS key log material for wireshark
  #[arg(short = 'n', long)]
  nss_key_log_file: Option<PathBuf>,

  /// PEM certificate to present to victims (requires --pem-key-file;
  /// without it a self-signed certificate is generated at startup)
  #[arg(short = 'p', long, requires = "pem_key_file")]
  pem_cert_file: Option<PathBuf>,

  /// PEM key for --pem-cert-file
  #[arg(short = 'k', long, requires = "pem_cert_file")]
  pem_key_file: Option<PathBuf>,

  /// Log level for engine diagnostics (trace, debug, info, warn, error)
  #[arg(long, default_value = "info")]
  log_level: String,
}

#[derive(Args)]
struct PemArgs {
  /// File to receive the PEM certificate
  #[arg(long)]
  cert_file: PathBuf,

  /// File to receive the PEM key
  #[arg(long)]
  key_file: PathBuf,

  /// Organization name for the certificate
  #[arg(short = 'n', long, default_value = "tlsplit")]
  org_name: String,

  /// IP addresses for the certificate
  #[arg(short = 'i', long = "ip", default_value = "127.0.0.1")]
  ips: Vec<IpAddr>,

  /// DNS names for the certificate
  #[arg(short = 's', long = "name", default_value = "tlsplit")]
  names: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  match cli.command {
    Command::Run(args) => {
      tracing_subscriber::fmt()
        .with_env_filter(
          EnvFilter::try_from_default_env().unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .init();
      run(args).await
    }
    Command::Pem(args) => pem(args),
  }
}

async fn run(args: RunArgs) -> Result<()> {
  let listen: SocketAddr = args.listen_addr.parse().context("parsing --listen-addr")?;
  let (downstream_host, downstream_port) = args
    .downstream_addr
    .rsplit_once(':')
    .context("parsing --downstream-addr: expected host:port")?;
  let downstream = Addr::new(downstream_host, downstream_port);

  // victim-leg certificate: the supplied PEM pair, or a fresh self-signed one
  let (cert_chain, key) = match (&args.pem_cert_file, &args.pem_key_file) {
    (Some(cert_path), Some(key_path)) => {
      tlsplit::cert::load_key_pair(cert_path, key_path).context("loading certificate pair")?
    }
    _ => {
      info!("no certificate supplied, generating a self-signed one");
      let cert = SelfSignedCert::generate("tlsplit", &[listen.ip()], &["localhost".to_string()])?;
      (vec![cert.cert_der()], cert.key_der())
    }
  };

  let mut server_tls = ServerConfig::builder()
    .with_no_client_auth()
    .with_single_cert(cert_chain, key)
    .context("building victim-leg tls config")?;
  let mut client_tls = tlsplit::tls::insecure_client_config();

  if let Some(path) = &args.nss_key_log_file {
    let key_log = Arc::new(FileKeyLog::append(path).context("opening nss key log file")?);
    server_tls.key_log = key_log.clone();
    client_tls.key_log = key_log;
  }

  let log_writer =
    Arc::new(JsonLineWriter::append(&args.log_file, true).context("opening log file")?);
  let data_writer = match &args.data_log_file {
    Some(path) => Some(Arc::new(
      JsonLineWriter::append(path, false).context("opening data log file")?,
    )),
    None if args.data_to_log => Some(log_writer.clone()),
    None => None,
  };

  let policy = StaticPolicy::new(
    downstream,
    Arc::new(server_tls),
    Arc::new(client_tls),
    log_writer,
    data_writer,
  );

  let listener = TcpListener::bind(listen)
    .await
    .with_context(|| format!("binding listener on {listen}"))?;
  let server = ProxyServer::new(policy, listener);

  let cancel = CancellationToken::new();
  let on_ctrl_c = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      on_ctrl_c.cancel();
    }
  });

  println!("starting server on {listen}");
  server.serve(cancel).await.context("running the proxy server")?;
  Ok(())
}

fn pem(args: PemArgs) -> Result<()> {
  let cert = SelfSignedCert::generate(&args.org_name, &args.ips, &args.names)?;

  let mut cert_file =
    File::create(&args.cert_file).context("opening certificate file for writing")?;
  let mut key_file = File::create(&args.key_file).context("opening key file for writing")?;
  cert.write_pem(&mut cert_file, &mut key_file)?;

  println!(
    "wrote {} and {}",
    args.cert_file.display(),
    args.key_file.display()
  );
  Ok(())
}
