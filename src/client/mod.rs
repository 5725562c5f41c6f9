pub mod frappe;
pub mod iclock;
