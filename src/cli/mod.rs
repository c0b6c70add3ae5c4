//! CLI command implementations

use std::path::Path;

use crate::assistant::Role;
use crate::auth;
use crate::config::Config;
use crate::store::Store;

/// Write the default configuration as TOML.
pub fn run_init(output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if output.exists() {
        return Err(format!("{} already exists, refusing to overwrite", output.display()).into());
    }
    println!("Initializing configuration file at {}...", output.display());
    let body = Config::default().to_toml()?;
    std::fs::write(output, format!("# SmartSQL configuration\n\n{}", body))?;
    println!("Configuration file created successfully.");
    Ok(())
}

pub async fn run_migrate(config: &Config, seed: bool) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::connect(&config.database).await?;
    store.migrate().await?;
    println!("Schema ready at {}", config.database.url);
    if seed {
        if store.seed_demo().await? {
            println!("Demo data loaded (students 1-3, instructors 10-11).");
        } else {
            println!("Database already has users, demo data skipped.");
        }
    }
    Ok(())
}

pub async fn run_status(host: &str) -> Result<(), Box<dyn std::error::Error>> {
    let base_url = if host.starts_with("http") { host.to_string() } else { format!("http://{}", host) };
    println!("Checking status of {}...", base_url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(2))
        .build()?;

    match client.get(format!("{}/health", base_url)).send().await {
        Ok(res) if res.status().is_success() => {
            println!("SUCCESS: Server is UP and responding.");
            let body: serde_json::Value = res.json().await.unwrap_or_default();
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Ok(res) => {
            println!("WARNING: Server responded with error status: {}", res.status());
        }
        Err(e) => {
            println!("ERROR: Could not connect to server: {}", e);
            println!("Is the server running?");
        }
    }
    Ok(())
}

/// Print a bearer token for `user` signed with `[auth].jwt_secret`.
pub fn generate_token(
    config: &Config,
    user: i64,
    role: &str,
    expiry_hours: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let role: Role = role.parse()?;
    let token = auth::issue_token(&config.auth, user, role, expiry_hours)?;

    println!("Generated JWT token for user {} ({})", user, role);
    println!("Expires in {} hours", expiry_hours.unwrap_or(config.auth.token_ttl_hours));
    println!();
    println!("{}", token);
    println!();
    println!("Usage:");
    println!("  curl -H \"Authorization: Bearer {}\" http://localhost:{}/api/student/courses", token, config.server.port);
    Ok(())
}
