//! svnup WebDAV/HTTP protocol implementation
//!
//! Read-only access to Subversion repositories served by mod_dav_svn over
//! http:// or https://.

pub mod client;
pub mod codec;
pub mod href;
pub mod xml;

pub use client::DavRepository;
pub use codec::{HttpDecoder, HttpResponse};
pub use href::HrefMapper;
pub use xml::XmlError;
