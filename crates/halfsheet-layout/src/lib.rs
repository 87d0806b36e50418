pub mod constants;
mod io;
pub mod layout;
mod template;
mod types;

pub use io::{
    load_pdf, load_pdf_blocking, page_count, page_size, read_document_info_blocking,
    read_page_size, read_page_size_blocking,
};
pub use layout::*;
pub use template::*;
pub use types::*;
