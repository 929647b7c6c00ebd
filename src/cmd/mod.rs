pub mod arp;
pub mod check;
pub mod serve;
