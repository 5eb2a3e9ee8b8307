//! Key management walkthrough
//!
//! Runs the whole flow against in-memory storage with freshly generated secrets.

use std::sync::Arc;

use kms::password::CredentialHasher;
use kms::user_service::DEFAULT_SESSION_TTL_MS;
use kms::{InMemoryStorage, KeyManager, KeyService, KeyStorage, UserService, UserStorage};

fn preview(value: &str) -> String {
    if value.len() > 16 {
        format!("{}...{}", &value[..8], &value[value.len() - 4..])
    } else {
        value.to_string()
    }
}

#[tokio::main]
async fn main() {
    kms::telemetry::init("info");

    println!("=== Key Management Service Walkthrough ===\n");

    let storage = Arc::new(InMemoryStorage::new());
    let keys = Arc::new(KeyManager::generate());
    println!("[INIT] {:?}\n", keys);

    let users = UserService::new(Arc::clone(&storage), Arc::clone(&keys), DEFAULT_SESSION_TTL_MS)
        .with_hasher(CredentialHasher::with_cost(6));
    let key_service = KeyService::new(Arc::clone(&storage), Arc::clone(&keys));

    // Signup
    let grant = users.issue_signup_token("alice", 10 * 60 * 1000).expect("Failed to issue grant");
    println!("[SIGNUP] Grant for alice: {}", preview(&grant));
    let alice = users.signup(&grant, "alice", "correct-horse").await.expect("Signup failed");
    println!("[SIGNUP] Created user {} with role {}", alice.id, alice.role);

    let stored = storage.get_user(alice.id).await.expect("User missing");
    println!("[SIGNUP] At rest: username={} role={}\n", preview(&stored.username), preview(&stored.role));

    // Login
    let session = users.login("alice", "correct-horse").await.expect("Login failed");
    let principal = users.authenticate(&session).await.expect("Session rejected");
    println!("[LOGIN] Session: {}", preview(&session));
    println!("[LOGIN] Authenticated as user {} ({})\n", principal.user_id, principal.role);

    // Keys
    let created = key_service.create_key(principal.user_id, "db-key").await.expect("Create failed");
    println!("[CREATE] Key {} DEK: {}", created.id, preview(&created.dek));

    let raw = storage.get_all_keys(principal.user_id).await.expect("List failed");
    println!("[CREATE] At rest: ref={} dek={}", preview(&raw[0].key_reference_hash), preview(&raw[0].dek));

    let fetched = key_service.get_key(principal.user_id, "db-key").await.expect("Get failed");
    println!("[GET] Same DEK: {}", fetched.dek == created.dek);

    let renewed = key_service.renew_key(principal.user_id, "db-key").await.expect("Renew failed");
    println!("[RENEW] Key {} new DEK: {}", renewed.id, preview(&renewed.dek));
    println!("[RENEW] DEK changed: {}", renewed.dek != created.dek);

    match key_service.create_key(principal.user_id, "db-key").await {
        Err(e) => println!("[CREATE AGAIN] Rejected: {} (status {})", e, e.status_code()),
        Ok(_) => println!("[CREATE AGAIN] Unexpectedly succeeded"),
    }
    match key_service.create_key(principal.user_id, "bad/ref").await {
        Err(e) => println!("[CREATE BAD REF] Rejected: {} (status {})", e, e.status_code()),
        Ok(_) => println!("[CREATE BAD REF] Unexpectedly succeeded"),
    }

    println!("\n=== Summary ===");
    println!("- KEK seals DEKs, db key seals usernames and roles");
    println!("- Blind indexes make references and usernames searchable");
    println!("- Session and signup tokens share one HMAC-signed format");
}
