use dotenv::dotenv;
use std::env;

use manduvi_portal::config::PortalConfig;
use manduvi_portal::profile::{AccountStatus, Role};
use manduvi_portal::Portal;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenv().ok();

    let config = PortalConfig::from_env()?;
    let portal = Portal::from_config(&config);
    let manager = portal.session_manager();

    let admin_email = env::var("ADMIN_EMAIL").expect("ADMIN_EMAIL must be set");
    let admin_password = env::var("ADMIN_PASSWORD").expect("ADMIN_PASSWORD must be set");

    println!("Starting admin users demo");
    println!("Signing in as {}", admin_email);

    let session = manager.sign_in(&admin_email, &admin_password).await?;

    let admin = portal.admin_users();

    // List every portal account through the privileged endpoint.
    let accounts = admin.list(&session).await?;
    println!("\nThe portal has {} accounts:", accounts.len());
    for account in &accounts {
        println!(
            "  {} role={} status={}",
            account.email, account.role, account.status
        );
    }

    // Suspend and reactivate the first ordinary account, leaving it as found.
    if let Some(target) = accounts.iter().find(|a| a.role == Role::Usuario) {
        println!("\nSuspending {}", target.email);
        admin
            .update_status(&session, &target.id, AccountStatus::Suspended)
            .await?;

        println!("Reactivating {}", target.email);
        admin
            .update_status(&session, &target.id, AccountStatus::Active)
            .await?;
    } else {
        println!("\nNo ordinary account found to update");
    }

    println!("\nSigning out");
    manager.sign_out().await?;

    println!("Admin users demo completed");

    Ok(())
}
