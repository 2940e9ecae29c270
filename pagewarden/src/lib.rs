pub mod handlers;

// Re-export commonly used handler functions for convenience
pub use handlers::{check_submission, load_urls_from_file, parse_url_line, resolve_db_path};

pub use pagewarden_scanner::urls::extract_url_path;
