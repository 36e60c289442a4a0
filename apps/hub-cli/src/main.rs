//! Relay hub command-line client.
//!
//! Connects with the settings from the config file, logs calls to the
//! subscribed server methods, runs the configured invocation once and stays
//! connected until Ctrl-C.

mod config;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting relayhub client");

    let config = config::ClientConfig::load()?;
    let connection = config.to_builder()?.build()?;

    for method in &config.subscribe {
        let name = method.clone();
        connection.on(method, move |args| {
            tracing::info!(method = %name, args = %render_args(args), "server call");
        });
    }

    connection.on_reconnecting(|error| {
        tracing::warn!(error = ?error.map(ToString::to_string), "connection lost, reconnecting");
    });
    connection.on_reconnected(|id| {
        tracing::info!(connection_id = ?id, "reconnected");
    });
    connection.on_close(|error| match error {
        Some(e) => tracing::error!(error = %e, "connection closed"),
        None => tracing::info!("connection closed"),
    });

    connection.start().await?;
    tracing::info!(url = %config.url, connection_id = ?connection.connection_id(), "connected");

    if let Some(call) = &config.invoke {
        match connection.invoke(&call.method, call.args.clone()).await {
            Ok(result) => tracing::info!(method = %call.method, result = %result, "invocation completed"),
            Err(e) => tracing::error!(method = %call.method, error = %e, "invocation failed"),
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    connection.stop().await;
    Ok(())
}

/// Renders call arguments as one JSON array for the log line.
fn render_args(args: &[serde_json::Value]) -> String {
    serde_json::Value::from(args.to_vec()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn render_args_as_json_array() {
        assert_eq!(render_args(&[json!("hi"), json!(2)]), r#"["hi",2]"#);
        assert_eq!(render_args(&[]), "[]");
    }
}
