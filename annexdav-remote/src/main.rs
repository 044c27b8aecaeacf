mod credentials;
mod protocol;
mod session;

use tracing::info;
use tracing_subscriber::EnvFilter;

use annexdav_core::DavClient;

use credentials::Credentials;
use protocol::Host;
use session::Session;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the protocol, so all diagnostics go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(|s| s.as_str()) == Some("version") {
        println!("git-annex-remote-annexdav {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    info!("git-annex-remote-annexdav starting");

    let mut session = Session::new(|| {
        let credentials = Credentials::load()?;
        Ok(DavClient::new(
            &credentials.url,
            &credentials.username,
            &credentials.password,
        ))
    });
    let mut host = Host::new(tokio::io::stdin(), tokio::io::stdout());
    session.run(&mut host).await
}
