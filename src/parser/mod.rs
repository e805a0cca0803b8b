pub mod extract;
pub mod html;
pub mod listing;
