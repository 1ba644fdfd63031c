//! Agent Billing Service - invoices, payments, wallets and partner commissions.

pub mod audit;
pub mod config;
pub mod error;
pub mod models;
pub mod repositories;
pub mod services;
pub mod startup;
pub mod store;
pub mod unit_of_work;

pub use audit::{Actor, RequestContext, Role};
pub use error::{BillingError, OperationFailure};
pub use unit_of_work::{UnitOfWork, UnitOfWorkFactory};
