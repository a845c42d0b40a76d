mod db;

pub use db::{Catalogue, MembershipRow};
