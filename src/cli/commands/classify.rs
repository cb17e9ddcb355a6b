use anyhow::Result;

use super::Command;
use crate::scan::{classify_scan, normalize_token};

pub struct ClassifyCommand {
    pub token: String,
}

impl ClassifyCommand {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

impl Command for ClassifyCommand {
    async fn execute(&self) -> Result<()> {
        let item_type = classify_scan(&self.token)?;
        println!("{} {}", normalize_token(&self.token), item_type);
        Ok(())
    }
}
