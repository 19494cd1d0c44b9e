//! The local credit ledger: [`CreditLedger`] for [`SqliteStore`].
//!
//! Balances live in `credit_accounts`; every movement is journaled in
//! `credit_transactions`. A spend never takes a balance below zero.

use rusqlite::{OptionalExtension as _, TransactionBehavior};
use simmer_core::ports::CreditLedger;
use uuid::Uuid;

use crate::{
  encode::{encode_dt, encode_uuid, now},
  Error, Result, SqliteStore,
};

const KIND_GRANT: &str = "grant";
const KIND_SPEND: &str = "spend";
const KIND_REFUND: &str = "refund";

impl SqliteStore {
  /// Add `amount` credits to a user's balance, creating the account if needed.
  pub async fn grant(&self, user_id: Uuid, amount: i64) -> Result<()> {
    self.credit(user_id, None, amount, KIND_GRANT).await
  }

  /// Current balance; zero for users without an account.
  pub async fn balance(&self, user_id: Uuid) -> Result<i64> {
    let user_id_str = encode_uuid(user_id);

    let balance: Option<i64> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT balance FROM credit_accounts WHERE user_id = ?1",
            rusqlite::params![user_id_str],
            |r| r.get(0),
          )
          .optional()?)
      })
      .await?;

    Ok(balance.unwrap_or(0))
  }

  async fn credit(
    &self,
    user_id:   Uuid,
    recipe_id: Option<Uuid>,
    amount:    i64,
    kind:      &'static str,
  ) -> Result<()> {
    if amount <= 0 {
      return Err(Error::InvalidAmount(amount));
    }

    let tx_id_str     = encode_uuid(Uuid::new_v4());
    let user_id_str   = encode_uuid(user_id);
    let recipe_id_str = recipe_id.map(encode_uuid);
    let at_str        = encode_dt(now());

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
          "INSERT INTO credit_accounts (user_id, balance) VALUES (?1, ?2)
           ON CONFLICT (user_id) DO UPDATE SET balance = balance + excluded.balance",
          rusqlite::params![user_id_str, amount],
        )?;
        tx.execute(
          "INSERT INTO credit_transactions (
             transaction_id, user_id, recipe_id, kind, amount, recorded_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![tx_id_str, user_id_str, recipe_id_str, kind, amount, at_str],
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

impl CreditLedger for SqliteStore {
  type Error = Error;

  async fn spend(&self, user_id: Uuid, recipe_id: Uuid, amount: i64) -> Result<()> {
    if amount <= 0 {
      return Err(Error::InvalidAmount(amount));
    }

    let tx_id_str     = encode_uuid(Uuid::new_v4());
    let user_id_str   = encode_uuid(user_id);
    let recipe_id_str = encode_uuid(recipe_id);
    let at_str        = encode_dt(now());

    // `Some(balance)` when the balance is too low and nothing was written.
    let shortfall: Option<i64> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let balance: i64 = tx
          .query_row(
            "SELECT balance FROM credit_accounts WHERE user_id = ?1",
            rusqlite::params![user_id_str],
            |r| r.get(0),
          )
          .optional()?
          .unwrap_or(0);

        if balance < amount {
          return Ok(Some(balance));
        }

        tx.execute(
          "UPDATE credit_accounts SET balance = balance - ?1 WHERE user_id = ?2",
          rusqlite::params![amount, user_id_str],
        )?;
        tx.execute(
          "INSERT INTO credit_transactions (
             transaction_id, user_id, recipe_id, kind, amount, recorded_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![tx_id_str, user_id_str, recipe_id_str, KIND_SPEND, amount, at_str],
        )?;
        tx.commit()?;
        Ok(None)
      })
      .await?;

    match shortfall {
      Some(balance) => Err(Error::InsufficientCredit { user_id, balance, requested: amount }),
      None => Ok(()),
    }
  }

  async fn refund(&self, user_id: Uuid, recipe_id: Uuid, amount: i64) -> Result<()> {
    self.credit(user_id, Some(recipe_id), amount, KIND_REFUND).await
  }
}
