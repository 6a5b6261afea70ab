use clap::Parser;

/// Republish a GitHub Copilot subscription as OpenAI- and
/// Anthropic-compatible endpoints.
#[derive(Debug, Parser)]
#[command(name = "copgate", version)]
pub struct Cli {
    /// Listen port.
    #[arg(long, short, default_value_t = 4141)]
    pub port: u16,

    /// GitHub personal access token; skips the stored token and the
    /// device-code flow.
    #[arg(long, env = "GITHUB_TOKEN")]
    pub github_token: Option<String>,

    /// Copilot account type: individual, business, or enterprise.
    #[arg(long, default_value = "individual")]
    pub account_type: String,

    /// Verbose (debug) logging.
    #[arg(long, short)]
    pub verbose: bool,

    /// Log the GitHub and Copilot tokens after login and refresh.
    #[arg(long)]
    pub show_token: bool,

    /// Minimum seconds between requests.
    #[arg(long)]
    pub rate_limit: Option<u64>,

    /// Sleep instead of rejecting when the rate limit is hit.
    #[arg(long)]
    pub rate_limit_wait: bool,

    /// Prompt on the terminal before serving each request.
    #[arg(long)]
    pub manual_approve: bool,

    /// Honor HTTP(S)_PROXY environment variables for upstream egress.
    #[arg(long)]
    pub proxy_env: bool,
}
