use dotenv::dotenv;
use serde_json::json;
use std::env;
use uuid::Uuid;

use manduvi_portal::auth::SignUp;
use manduvi_portal::config::PortalConfig;
use manduvi_portal::Portal;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenv().ok();

    let config = PortalConfig::from_env()?;
    let portal = Portal::from_config(&config);
    let manager = portal.session_manager();

    println!("Starting bootstrap demo");

    // Settle the initial auth state: cached session, retries, fallbacks.
    let snapshot = manager.bootstrap().await;
    println!(
        "Bootstrap settled: phase={:?} authenticated={}",
        snapshot.phase,
        snapshot.is_authenticated()
    );
    if let Some(error) = &snapshot.error {
        println!("Bootstrap note: {}", error);
    }

    // Sign in with configured credentials, or register a throwaway account.
    let session = match (env::var("PORTAL_EMAIL"), env::var("PORTAL_PASSWORD")) {
        (Ok(email), Ok(password)) => {
            println!("\nSigning in as {}", email);
            manager.sign_in(&email, &password).await?
        }
        _ => {
            let email = format!("demo-{}@example.com", Uuid::new_v4());
            println!("\nPORTAL_EMAIL not set; registering {}", email);

            match manager
                .sign_up(&email, "demoSenha123!", Some(json!({ "name": "Demo" })))
                .await?
            {
                SignUp::Session(session) => session,
                SignUp::ConfirmationPending(user) => {
                    println!("Sign-up for {} is pending email confirmation", user.id);
                    return Ok(());
                }
            }
        }
    };

    println!("Signed in as user {}", session.user.id);

    let snapshot = manager.refresh_profile().await;
    if let Some(profile) = &snapshot.profile {
        println!(
            "Profile: role={} status={} completed={}",
            profile.role, profile.status, profile.profile_completed
        );
    }

    println!("\nSigning out");
    manager.sign_out().await?;

    let snapshot = manager.snapshot();
    println!(
        "Final state: phase={:?} authenticated={}",
        snapshot.phase,
        snapshot.is_authenticated()
    );

    println!("Bootstrap demo completed");

    Ok(())
}
