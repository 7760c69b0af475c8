use crate::db::{Command, CommandExecutor, ConnectionFactory, DbContext};
use crate::error::DbResult;
use crate::models::Customer;
use std::sync::Arc;

const COLUMNS: &str = r#"Id AS "Id", Name AS "Name", Email AS "Email", Phone AS "Phone",
    CreatedAt AS "CreatedAt""#;

pub struct CustomerRepository<F: ConnectionFactory> {
    executor: Arc<CommandExecutor<F>>,
}

impl<F: ConnectionFactory> CustomerRepository<F> {
    pub fn new(executor: Arc<CommandExecutor<F>>) -> Self {
        Self { executor }
    }

    pub async fn get(&self, ctx: &mut DbContext<F::Conn>, id: i64) -> DbResult<Option<Customer>> {
        let command = Command::text(format!("SELECT {COLUMNS} FROM Customers WHERE Id = @id"))
            .param("id", id);
        Ok(self
            .executor
            .query_first_or_default(ctx, &command)
            .await?
            .into_value())
    }

    /// Email comparison is case-insensitive.
    pub async fn find_by_email(
        &self,
        ctx: &mut DbContext<F::Conn>,
        email: &str,
    ) -> DbResult<Option<Customer>> {
        let command = Command::text(format!(
            "SELECT {COLUMNS} FROM Customers WHERE LOWER(Email) = LOWER(@email)"
        ))
        .param("email", email);
        Ok(self
            .executor
            .query_first_or_default(ctx, &command)
            .await?
            .into_value())
    }
}
