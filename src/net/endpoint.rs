use std::convert::Infallible;
use std::ffi::CString;
use std::fmt;
use std::io;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::{Error, Result};

/// A user-level address: a Unix socket path or an internet host and port.
///
/// The string grammar:
///
/// - starts with `/`: a Unix socket, the whole string is the path;
/// - contains `:`: an internet socket, host before, port after;
/// - otherwise: an internet socket with an empty (wildcard) host.
///
/// ```
/// use netio::net::Endpoint;
///
/// let unix: Endpoint = "/run/app.sock".parse().unwrap();
/// assert!(matches!(unix, Endpoint::Unix(_)));
///
/// let inet: Endpoint = "localhost:4000".parse().unwrap();
/// assert!(matches!(inet, Endpoint::Inet(_)));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Inet(InetEndpoint),
    Unix(UnixEndpoint),
}

/// An internet host and port. The port may be a service name; resolution
/// happens at connect or bind time. An empty host binds the wildcard
/// address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InetEndpoint {
    pub host: String,
    pub port: String,
}

/// A Unix socket path with optional ownership and permissions, applied
/// after the socket is bound.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct UnixEndpoint {
    pub path: PathBuf,
    /// File mode bits for the socket file.
    pub mode: Option<u32>,
    /// Owning user, by name or uid.
    pub owner: Option<Owner>,
    /// Owning group, by name or gid.
    pub group: Option<Group>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Owner {
    Id(libc::uid_t),
    Name(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Group {
    Id(libc::gid_t),
    Name(String),
}

impl Endpoint {
    /// Parses the endpoint grammar. Never fails; any string denotes some
    /// endpoint.
    pub fn parse(string: &str) -> Endpoint {
        if string.starts_with('/') {
            return Endpoint::Unix(UnixEndpoint {
                path: PathBuf::from(string),
                ..UnixEndpoint::default()
            });
        }

        match string.split_once(':') {
            Some((host, port)) => Endpoint::Inet(InetEndpoint {
                host: host.into(),
                port: port.into(),
            }),
            None => Endpoint::Inet(InetEndpoint {
                host: String::new(),
                port: string.into(),
            }),
        }
    }
}

impl FromStr for Endpoint {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Endpoint, Infallible> {
        Ok(Endpoint::parse(s))
    }
}

impl From<&str> for Endpoint {
    fn from(string: &str) -> Endpoint {
        Endpoint::parse(string)
    }
}

impl From<UnixEndpoint> for Endpoint {
    fn from(unix: UnixEndpoint) -> Endpoint {
        Endpoint::Unix(unix)
    }
}

impl From<InetEndpoint> for Endpoint {
    fn from(inet: InetEndpoint) -> Endpoint {
        Endpoint::Inet(inet)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Inet(inet) => write!(f, "{}:{}", inet.host, inet.port),
            Endpoint::Unix(unix) => write!(f, "{}", unix.path.display()),
        }
    }
}

impl UnixEndpoint {
    pub fn new(path: impl Into<PathBuf>) -> UnixEndpoint {
        UnixEndpoint {
            path: path.into(),
            ..UnixEndpoint::default()
        }
    }

    /// Applies the configured mode and ownership to the socket file.
    pub(crate) fn apply_permissions(&self) -> Result<()> {
        let path = c_path(&self.path)?;

        if let Some(mode) = self.mode {
            syscall!(chmod(path.as_ptr(), mode as libc::mode_t))?;
        }

        let uid = match &self.owner {
            Some(Owner::Id(uid)) => *uid,
            Some(Owner::Name(name)) => lookup_user(name)?,
            None => libc::uid_t::MAX,
        };

        let gid = match &self.group {
            Some(Group::Id(gid)) => *gid,
            Some(Group::Name(name)) => lookup_group(name)?,
            None => libc::gid_t::MAX,
        };

        if uid != libc::uid_t::MAX || gid != libc::gid_t::MAX {
            syscall!(chown(path.as_ptr(), uid, gid))?;
        }

        Ok(())
    }
}

fn c_path(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| Error::Io(io::Error::new(io::ErrorKind::InvalidInput, "path contains a nul byte")))
}

fn lookup_user(name: &str) -> Result<libc::uid_t> {
    let name = CString::new(name)
        .map_err(|_| Error::Io(io::Error::new(io::ErrorKind::InvalidInput, "user name contains a nul byte")))?;

    let mut passwd: libc::passwd = unsafe { mem::zeroed() };
    let mut buffer = vec![0 as libc::c_char; 1024];
    let mut result: *mut libc::passwd = std::ptr::null_mut();

    let code = unsafe {
        libc::getpwnam_r(
            name.as_ptr(),
            &mut passwd,
            buffer.as_mut_ptr(),
            buffer.len(),
            &mut result,
        )
    };

    if code != 0 {
        return Err(Error::Io(io::Error::from_raw_os_error(code)));
    }

    if result.is_null() {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no such user: {}", name.to_string_lossy()),
        )));
    }

    Ok(passwd.pw_uid)
}

fn lookup_group(name: &str) -> Result<libc::gid_t> {
    let name = CString::new(name)
        .map_err(|_| Error::Io(io::Error::new(io::ErrorKind::InvalidInput, "group name contains a nul byte")))?;

    let mut group: libc::group = unsafe { mem::zeroed() };
    let mut buffer = vec![0 as libc::c_char; 1024];
    let mut result: *mut libc::group = std::ptr::null_mut();

    let code = unsafe {
        libc::getgrnam_r(
            name.as_ptr(),
            &mut group,
            buffer.as_mut_ptr(),
            buffer.len(),
            &mut result,
        )
    };

    if code != 0 {
        return Err(Error::Io(io::Error::from_raw_os_error(code)));
    }

    if result.is_null() {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no such group: {}", name.to_string_lossy()),
        )));
    }

    Ok(group.gr_gid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_slash_is_unix() {
        let endpoint = Endpoint::parse("/run/netio.sock");

        match endpoint {
            Endpoint::Unix(unix) => assert_eq!(unix.path, PathBuf::from("/run/netio.sock")),
            other => panic!("expected a unix endpoint, got {:?}", other),
        }
    }

    #[test]
    fn host_and_port() {
        assert_eq!(
            Endpoint::parse("example.com:4000"),
            Endpoint::Inet(InetEndpoint {
                host: "example.com".into(),
                port: "4000".into(),
            })
        );
    }

    #[test]
    fn bare_port_has_empty_host() {
        assert_eq!(
            Endpoint::parse("4000"),
            Endpoint::Inet(InetEndpoint {
                host: String::new(),
                port: "4000".into(),
            })
        );
    }

    #[test]
    fn first_colon_splits() {
        let Endpoint::Inet(inet) = Endpoint::parse("localhost:http") else {
            panic!("expected an inet endpoint");
        };

        assert_eq!(inet.host, "localhost");
        assert_eq!(inet.port, "http");
    }
}
