pub mod route_file;

pub use route_file::RouteFile;
