//! Customer persistence over a single PostgreSQL connection.

use crate::domain::Customer;
use crate::error::{RepoError, RepoResult};
use sqlx::{Connection, PgConnection};
use tokio::sync::Mutex;

pub struct CustomerRepository {
    conn: Mutex<PgConnection>,
}

impl CustomerRepository {
    pub async fn connect(connection_string: &str) -> RepoResult<Self> {
        let conn = PgConnection::connect(connection_string)
            .await
            .map_err(RepoError::Connect)?;
        Ok(Self::new(conn))
    }

    pub fn new(conn: PgConnection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Inserts the customer and returns it with the id the database assigned.
    pub async fn create_customer(&self, customer: Customer) -> RepoResult<Customer> {
        tracing::debug!(email = %customer.email, "creating customer");
        let mut conn = self.conn.lock().await;
        let id: i32 =
            sqlx::query_scalar("INSERT INTO customers (name, email) VALUES ($1, $2) RETURNING id")
                .bind(&customer.name)
                .bind(&customer.email)
                .fetch_one(&mut *conn)
                .await?;
        Ok(Customer {
            id: Some(id),
            ..customer
        })
    }

    pub async fn get_customer_by_email(&self, email: &str) -> RepoResult<Customer> {
        tracing::debug!(%email, "getting customer");
        let mut conn = self.conn.lock().await;
        sqlx::query_as::<_, Customer>("SELECT id, name, email FROM customers WHERE email = $1")
            .bind(email)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| RepoError::NotFound {
                email: email.to_string(),
            })
    }

    /// Deletes the customer, failing unless exactly one row went away.
    pub async fn delete_customer_by_email(&self, email: &str) -> RepoResult<()> {
        tracing::debug!(%email, "deleting customer");
        let mut conn = self.conn.lock().await;
        let result = sqlx::query("DELETE FROM customers WHERE email = $1")
            .bind(email)
            .execute(&mut *conn)
            .await?;
        match result.rows_affected() {
            1 => Ok(()),
            0 => Err(RepoError::NotFound {
                email: email.to_string(),
            }),
            affected => Err(RepoError::UnexpectedRowCount {
                email: email.to_string(),
                affected,
            }),
        }
    }

    pub async fn close(self) -> RepoResult<()> {
        self.conn.into_inner().close().await?;
        Ok(())
    }
}
