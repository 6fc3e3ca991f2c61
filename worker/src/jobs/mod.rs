pub mod auto_billing;
pub mod subscription_expiry;
