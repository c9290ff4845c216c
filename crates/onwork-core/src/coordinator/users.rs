//! Account procedures: registration, role changes, and wallet linking.
//!
//! Linking a wallet is where earnings credited to that wallet before it
//! belonged to anyone are claimed.

use rusqlite::Connection;

use super::{Applied, Caller, ChangeSet, Coordinator, reconcile};
use crate::db::{self, query, write};
use crate::error::{Entity, OnworkError, Result};
use crate::escrow::EscrowClient;
use crate::model::{Amount, IdKind, Role, User, WalletAddress, new_id, now_us};

fn require_free_wallet(conn: &Connection, wallet: &WalletAddress, user_id: Option<&str>) -> Result<()> {
    match query::get_user_by_wallet(conn, wallet)? {
        Some(owner) if Some(owner.id.as_str()) != user_id => Err(OnworkError::validation(format!(
            "wallet {wallet} is already linked to another account"
        ))),
        _ => Ok(()),
    }
}

/// `Some(wallet)` when it still has to be linked, `None` when it already is.
fn check_link<'w>(
    conn: &Connection,
    user: &User,
    wallet: &'w WalletAddress,
) -> Result<Option<&'w WalletAddress>> {
    match &user.wallet_address {
        Some(linked) if linked == wallet => Ok(None),
        Some(linked) => Err(OnworkError::guard(format!("account already linked to {linked}"))),
        None => {
            require_free_wallet(conn, wallet, Some(&user.id))?;
            Ok(Some(wallet))
        }
    }
}

fn reload(conn: &Connection, user_id: &str) -> Result<User> {
    query::get_user(conn, user_id)?.ok_or_else(|| OnworkError::not_found(Entity::User, user_id))
}

impl<E: EscrowClient> Coordinator<'_, E> {
    /// Create an account.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty name, a malformed email, or
    /// an email or wallet that already belongs to someone.
    pub fn register(
        &self,
        name: &str,
        email: &str,
        wallet: Option<WalletAddress>,
        role: Role,
    ) -> Result<Applied<User>> {
        let name = name.trim();
        let email = email.trim();
        if name.is_empty() {
            return Err(OnworkError::validation("name must not be empty"));
        }
        if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
            return Err(OnworkError::validation(format!("'{email}' is not an email address")));
        }

        let tx = db::begin_immediate(self.conn)?;
        if query::get_user_by_email(&tx, email)?.is_some() {
            return Err(OnworkError::validation(format!("{email} is already registered")));
        }
        if let Some(wallet) = &wallet {
            require_free_wallet(&tx, wallet, None)?;
        }

        let now = now_us();
        let user = User {
            id: new_id(IdKind::User, email),
            name: name.to_string(),
            email: email.to_string(),
            wallet_address: wallet,
            role,
            total_earned: Amount::ZERO,
            total_spent: Amount::ZERO,
            created_at_us: now,
        };
        write::insert_user(&tx, &user)?;
        let mut changes = ChangeSet::default();
        changes.user(&user.id);
        if let Some(wallet) = &user.wallet_address {
            reconcile::claim_unclaimed(&tx, &mut changes, &self.config.reconcile, &user.id, wallet, now)?;
        }
        let user = reload(&tx, &user.id)?;
        tx.commit()?;
        tracing::info!(user_id = %user.id, role = %user.role, "user registered");
        Ok(Applied::new(user, changes))
    }

    /// The authenticated caller's account.
    ///
    /// # Errors
    ///
    /// Returns `Unauthenticated` for an anonymous caller.
    pub fn current_user(&self, caller: &Caller) -> Result<User> {
        self.authenticate(caller)
    }

    /// Become a freelancer, optionally linking a wallet in the same step.
    ///
    /// # Errors
    ///
    /// As [`Coordinator::link_wallet`] when a wallet is given.
    pub fn apply_as_freelancer(
        &self,
        caller: &Caller,
        wallet: Option<&WalletAddress>,
    ) -> Result<Applied<User>> {
        let user = self.authenticate(caller)?;
        let tx = db::begin_immediate(self.conn)?;
        let mut changes = ChangeSet::default();
        let linking = match wallet {
            Some(wallet) => check_link(&tx, &user, wallet)?,
            None => None,
        };
        write::update_user_identity(&tx, &user.id, Role::Freelancer, linking)?;
        changes.user(&user.id);
        if let Some(wallet) = linking {
            reconcile::claim_unclaimed(&tx, &mut changes, &self.config.reconcile, &user.id, wallet, now_us())?;
        }
        let updated = reload(&tx, &user.id)?;
        tx.commit()?;
        tracing::info!(user_id = %user.id, "user is now a freelancer");
        Ok(Applied::new(updated, changes))
    }

    /// Link a wallet to the caller's account and claim its unclaimed
    /// earnings. Linking the wallet already linked is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a precondition error when another wallet is already linked,
    /// and a validation error when the wallet belongs to someone else.
    pub fn link_wallet(&self, caller: &Caller, wallet: &WalletAddress) -> Result<Applied<User>> {
        let user = self.authenticate(caller)?;
        let tx = db::begin_immediate(self.conn)?;
        let mut changes = ChangeSet::default();
        if let Some(wallet) = check_link(&tx, &user, wallet)? {
            write::update_user_identity(&tx, &user.id, user.role, Some(wallet))?;
            changes.user(&user.id);
            reconcile::claim_unclaimed(&tx, &mut changes, &self.config.reconcile, &user.id, wallet, now_us())?;
            tracing::info!(user_id = %user.id, wallet = %wallet, "wallet linked");
        }
        let updated = reload(&tx, &user.id)?;
        tx.commit()?;
        Ok(Applied::new(updated, changes))
    }
}
