// Products domain - the numbered entity exposed over HTTP
pub mod models;
