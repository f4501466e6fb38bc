pub mod content;
pub use content::Content;
pub mod protocol;
pub mod tool;
pub use tool::Tool;
