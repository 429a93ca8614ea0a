pub mod crm;
pub mod decision;
pub mod session;
