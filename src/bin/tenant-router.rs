//! Tenant router process: serves operational routes and owns the tenant pool.
//!
//! `tenant-router` runs the server. `tenant-router onboard <slug> [domain]`
//! provisions and registers one company, then exits.

use std::sync::Arc;
use tenant_router::{common_routes, NewTenant, PgTenantRouter, Settings};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tenant_router=info")),
        )
        .init();

    let settings = Settings::from_env()?;
    let router = Arc::new(PgTenantRouter::connect(&settings).await?);

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("onboard") {
        let slug = args.get(1).ok_or("usage: tenant-router onboard <slug> [domain]")?;
        let record = router
            .onboard_tenant(NewTenant {
                slug: slug.clone(),
                domain: args.get(2).cloned(),
                max_users: None,
            })
            .await?;
        println!("{}", serde_json::to_string_pretty(&record)?);
        router.shutdown().await;
        return Ok(());
    }

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, common_routes(Arc::clone(&router)))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let report = router.shutdown().await;
    for (tenant_id, err) in &report.failed {
        tracing::warn!(%tenant_id, error = %err, "client did not close cleanly");
    }
    Ok(())
}
