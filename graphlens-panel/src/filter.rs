use std::str::FromStr;

use graphlens_core::{CapturedExchange, ExchangeStatus, OperationType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationFilter {
    #[default]
    All,
    Query,
    Mutation,
    Subscription,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    Pending,
    Success,
    Error,
}

impl FromStr for OperationFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "query" => Ok(Self::Query),
            "mutation" => Ok(Self::Mutation),
            "subscription" => Ok(Self::Subscription),
            other => Err(format!("unknown operation type filter: {other}")),
        }
    }
}

impl FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown status filter: {other}")),
        }
    }
}

/// Conjunction of the three panel filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub operation: OperationFilter,
    pub status: StatusFilter,
    pub text: String,
}

impl Filter {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn matches(&self, exchange: &CapturedExchange) -> bool {
        self.matches_operation(exchange) && self.matches_status(exchange) && self.matches_text(exchange)
    }

    fn matches_operation(&self, exchange: &CapturedExchange) -> bool {
        let detected = OperationType::detect(&exchange.query);
        match self.operation {
            OperationFilter::All => true,
            OperationFilter::Query => detected == OperationType::Query,
            OperationFilter::Mutation => detected == OperationType::Mutation,
            OperationFilter::Subscription => detected == OperationType::Subscription,
        }
    }

    fn matches_status(&self, exchange: &CapturedExchange) -> bool {
        match self.status {
            StatusFilter::All => true,
            StatusFilter::Pending => exchange.status == ExchangeStatus::Pending,
            StatusFilter::Success => exchange.status == ExchangeStatus::Success,
            StatusFilter::Error => exchange.status == ExchangeStatus::Error,
        }
    }

    fn matches_text(&self, exchange: &CapturedExchange) -> bool {
        let needle = self.text.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        if exchange.operation_name.to_lowercase().contains(&needle) {
            return true;
        }
        exchange
            .response
            .as_ref()
            .map(|r| r.to_string().to_lowercase().contains(&needle))
            .unwrap_or(false)
    }
}
