//! Founder CRM: projects and the north star every session is steered by.

pub mod handlers;
pub mod models;
pub mod store;
