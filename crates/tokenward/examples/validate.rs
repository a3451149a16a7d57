//! Validate a bearer token from the command line
//!
//! ```text
//! cargo run --example validate -- \
//!     --instance https://login.microsoftonline.com/ \
//!     --tenant contoso.onmicrosoft.com \
//!     --audience api://my-api \
//!     "$TOKEN"
//! ```
//!
//! Prints the issuer on success. On failure prints the HTTP status and
//! `WWW-Authenticate` challenge a resource server would answer with.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokenward::{Options, Validator, ValidatorConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "validate", about = "Validate an OpenID Connect bearer token")]
struct Args {
    /// Identity-provider instance
    #[arg(long, env = "TOKENWARD_INSTANCE", default_value = "https://login.microsoftonline.com/")]
    instance: String,

    /// Tenant ID or domain
    #[arg(long, env = "TOKENWARD_TENANT")]
    tenant: Option<String>,

    /// Explicit authority; overrides instance and tenant
    #[arg(long, env = "TOKENWARD_AUTHORITY")]
    authority: Option<String>,

    /// Accepted audience; repeat for several
    #[arg(long = "audience", required = true)]
    audiences: Vec<String>,

    /// Seconds to wait for discovery metadata
    #[arg(long, default_value_t = 30)]
    deadline: u64,

    /// Token or full `Authorization` header value
    token: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let options = Options {
        instance: Some(args.instance),
        tenant_id: args.tenant,
        authority: args.authority,
        audience: None,
        audiences: Some(args.audiences),
    };
    let config = ValidatorConfig::default().with_fetch_deadline(Duration::from_secs(args.deadline));
    let validator = Validator::configure(&options, config).context("invalid configuration")?;

    let result = if args.token.contains(char::is_whitespace) {
        validator.validate_authorization_header(&args.token).await
    } else {
        validator.validate(&args.token).await
    };

    match result {
        Ok(issuer) => {
            println!("valid token issued by {issuer}");
            Ok(())
        }
        Err(e) => {
            println!("{} {}", e.http_status(), e.kind());
            if let Some(challenge) = e.www_authenticate() {
                println!("WWW-Authenticate: {challenge}");
            }
            anyhow::bail!(e)
        }
    }
}
