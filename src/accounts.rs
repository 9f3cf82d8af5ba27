//! User accounts and login sessions.
//!
//! Passwords are stored as bcrypt hashes. The logged-in user's id
//! is kept in the store's `config` table under [`SESSION_KEY`]; commands act
//! as that user, or as the system actor when nobody is logged in.

use crate::action_log;
use crate::models::{Actor, AuditAction, User};
use crate::storage::Storage;
use crate::{Error, Result};
use chrono::Utc;

/// Config key holding the logged-in user's id.
pub const SESSION_KEY: &str = "session.user_id";

pub const MIN_PASSWORD_LEN: usize = 6;

/// bcrypt work factor. Tests use the minimum to stay fast.
#[cfg(not(test))]
const HASH_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const HASH_COST: u32 = 4;

/// bcrypt hash of `password`; the salt is embedded in the result.
pub fn hash_password(password: &str) -> Result<String> {
    bcrypt::hash(password, HASH_COST)
        .map_err(|e| Error::Other(format!("failed to hash password: {}", e)))
}

/// A malformed stored hash never verifies.
pub fn verify_password(user: &User, password: &str) -> bool {
    bcrypt::verify(password, &user.password_hash).unwrap_or(false)
}

/// Register a new account.
///
/// Fails with `Auth` when the confirmation differs from the password and with
/// `Conflict` when the e-mail is already registered.
pub fn register(
    storage: &mut Storage,
    email: &str,
    name: &str,
    password: &str,
    confirm: &str,
    actor: &Actor,
) -> Result<User> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(Error::Validation(format!("invalid e-mail: '{}'", email)));
    }
    if name.trim().is_empty() {
        return Err(Error::Validation("name is required".to_string()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::Validation(format!(
            "password must have at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    if password != confirm {
        return Err(Error::Auth(
            "password confirmation does not match".to_string(),
        ));
    }

    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        email: email.to_string(),
        name: name.trim().to_string(),
        password_hash: hash_password(password)?,
        is_admin: false,
        created_at: Utc::now(),
    };
    storage.create_user(&user)?;

    action_log::record(
        storage,
        AuditAction::UserCreate,
        format!("registered user {}", user.email),
        actor,
        Some(&user.id),
    )?;
    Ok(user)
}

/// Grant administrator rights to an existing user.
///
/// Only allowed while no administrator exists.
pub fn bootstrap_admin(storage: &mut Storage, email: &str, actor: &Actor) -> Result<User> {
    if storage.has_admin()? {
        return Err(Error::Auth(
            "an administrator already exists; bootstrap is closed".to_string(),
        ));
    }
    let mut user = storage
        .get_user_by_email(email)?
        .ok_or_else(|| Error::NotFound(format!("User not found: {}", email.trim())))?;

    storage.set_admin(&user.id, true)?;
    user.is_admin = true;

    action_log::record(
        storage,
        AuditAction::Update,
        format!("granted administrator rights to {}", user.email),
        actor,
        Some(&user.id),
    )?;
    Ok(user)
}

/// Check credentials and start a session.
pub fn login(storage: &mut Storage, email: &str, password: &str) -> Result<User> {
    let user = storage
        .get_user_by_email(email)?
        .filter(|user| verify_password(user, password))
        .ok_or_else(|| Error::Auth("invalid e-mail or password".to_string()))?;

    storage.set_config(SESSION_KEY, &user.id)?;
    action_log::record(
        storage,
        AuditAction::Login,
        format!("{} logged in", user.email),
        &Actor::from(&user),
        Some(&user.id),
    )?;
    Ok(user)
}

/// End the current session, returning who was logged in.
pub fn logout(storage: &mut Storage) -> Result<User> {
    let user = current_user(storage)?
        .ok_or_else(|| Error::Auth("not logged in".to_string()))?;

    storage.delete_config(SESSION_KEY)?;
    action_log::record(
        storage,
        AuditAction::Logout,
        format!("{} logged out", user.email),
        &Actor::from(&user),
        Some(&user.id),
    )?;
    Ok(user)
}

/// The logged-in user, if any. A session pointing at a deleted user counts as none.
pub fn current_user(storage: &Storage) -> Result<Option<User>> {
    match storage.get_config(SESSION_KEY)? {
        Some(id) => storage.get_user(&id),
        None => Ok(None),
    }
}

/// Who writes are attributed to: the logged-in user, else the system actor.
pub fn current_actor(storage: &Storage) -> Result<Actor> {
    Ok(current_user(storage)?
        .map(|user| Actor::from(&user))
        .unwrap_or_else(Actor::system))
}

/// Require an administrator session once any administrator exists.
pub fn require_admin(storage: &Storage) -> Result<()> {
    if !storage.has_admin()? {
        return Ok(());
    }
    match current_user(storage)? {
        Some(user) if user.is_admin => Ok(()),
        Some(user) => Err(Error::Auth(format!("{} is not an administrator", user.email))),
        None => Err(Error::Auth(
            "not logged in; an administrator session is required".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestEnv;

    fn setup() -> (TestEnv, Storage) {
        let env = TestEnv::new();
        let storage = env.init_storage();
        (env, storage)
    }

    fn add(storage: &mut Storage, email: &str) -> User {
        register(storage, email, "Ana", "secret1", "secret1", &Actor::system()).unwrap()
    }

    #[test]
    fn test_hash_embeds_fresh_salt() {
        let first = hash_password("secret1").unwrap();
        let second = hash_password("secret1").unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with("$2"));
        assert!(!first.contains("secret1"));
    }

    #[test]
    fn test_malformed_hash_never_verifies() {
        let (_env, mut storage) = setup();
        let mut user = add(&mut storage, "ana@example.org");
        user.password_hash = "not-a-bcrypt-hash".to_string();
        assert!(!verify_password(&user, "secret1"));
        assert!(!verify_password(&user, "not-a-bcrypt-hash"));
    }

    #[test]
    fn test_register_and_audit() {
        let (_env, mut storage) = setup();
        let user = add(&mut storage, "ana@example.org");
        assert!(!user.is_admin);
        assert!(verify_password(&user, "secret1"));
        assert!(!verify_password(&user, "secret2"));

        let log = storage.list_audit(10).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, AuditAction::UserCreate);
    }

    #[test]
    fn test_register_rejects_mismatch_and_duplicates() {
        let (_env, mut storage) = setup();
        let actor = Actor::system();

        assert!(matches!(
            register(&mut storage, "a@b.org", "A", "secret1", "secret2", &actor),
            Err(Error::Auth(_))
        ));
        assert!(matches!(
            register(&mut storage, "nope", "A", "secret1", "secret1", &actor),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            register(&mut storage, "a@b.org", "A", "123", "123", &actor),
            Err(Error::Validation(_))
        ));

        add(&mut storage, "a@b.org");
        assert!(matches!(
            register(&mut storage, " A@B.org ", "A", "secret1", "secret1", &actor),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn test_bootstrap_admin_only_once() {
        let (_env, mut storage) = setup();
        add(&mut storage, "first@example.org");
        add(&mut storage, "second@example.org");
        let actor = Actor::system();

        assert!(matches!(
            bootstrap_admin(&mut storage, "missing@example.org", &actor),
            Err(Error::NotFound(_))
        ));
        let admin = bootstrap_admin(&mut storage, "first@example.org", &actor).unwrap();
        assert!(admin.is_admin);
        assert!(matches!(
            bootstrap_admin(&mut storage, "second@example.org", &actor),
            Err(Error::Auth(_))
        ));
    }

    #[test]
    fn test_login_logout_session() {
        let (_env, mut storage) = setup();
        let user = add(&mut storage, "ana@example.org");

        assert!(matches!(
            login(&mut storage, "ana@example.org", "wrong!!"),
            Err(Error::Auth(_))
        ));
        assert!(matches!(
            login(&mut storage, "ghost@example.org", "secret1"),
            Err(Error::Auth(_))
        ));
        assert_eq!(current_actor(&storage).unwrap().id, "system");

        login(&mut storage, "ANA@example.org", "secret1").unwrap();
        assert_eq!(current_user(&storage).unwrap().unwrap().id, user.id);
        assert_eq!(current_actor(&storage).unwrap().id, user.id);

        let out = logout(&mut storage).unwrap();
        assert_eq!(out.id, user.id);
        assert!(current_user(&storage).unwrap().is_none());
        assert!(matches!(logout(&mut storage), Err(Error::Auth(_))));

        let actions: Vec<AuditAction> = storage
            .list_audit(10)
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert!(actions.contains(&AuditAction::Login));
        assert!(actions.contains(&AuditAction::Logout));
    }

    #[test]
    fn test_require_admin() {
        let (_env, mut storage) = setup();
        assert!(require_admin(&storage).is_ok());

        add(&mut storage, "admin@example.org");
        add(&mut storage, "staff@example.org");
        bootstrap_admin(&mut storage, "admin@example.org", &Actor::system()).unwrap();
        assert!(matches!(require_admin(&storage), Err(Error::Auth(_))));

        login(&mut storage, "staff@example.org", "secret1").unwrap();
        assert!(matches!(require_admin(&storage), Err(Error::Auth(_))));

        login(&mut storage, "admin@example.org", "secret1").unwrap();
        assert!(require_admin(&storage).is_ok());
    }
}
