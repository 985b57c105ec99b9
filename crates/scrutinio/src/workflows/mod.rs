pub mod scrutinio;
