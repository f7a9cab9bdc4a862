mod index_roots_page;

pub use index_roots_page::*;
