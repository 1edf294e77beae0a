//! Thin safe wrapper around the vendor VISA shared library, loaded at
//! runtime with `dlopen`. All handles close their underlying session on
//! drop; every failing call surfaces the VISA status code together with
//! the text reported by `viStatusDesc`.

use std::ffi::{CStr, CString};
use std::fmt::{Display, Formatter};
use std::os::raw::c_char;
use std::sync::Arc;

use dlopen::wrapper::{Container, WrapperApi};
use thiserror::Error;

#[derive(Error, Clone, Debug)]
pub struct VisaError {
    desc: String,
    code: i32,
}

pub type VisaResult<T> = std::result::Result<T, VisaError>;

impl Display for VisaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("VisaError({}): `{}`", self.code, self.desc))
    }
}

impl VisaError {
    pub(crate) fn new(code: i32, desc: String) -> Self {
        Self { desc, code }
    }

    pub fn code(&self) -> i32 {
        self.code
    }
}

impl From<VisaError> for crate::Error {
    fn from(err: VisaError) -> Self {
        crate::Error::Visa(err)
    }
}

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        const DEFAULT_LIBRARY: &str = "visa64.dll";
    } else {
        const DEFAULT_LIBRARY: &str = "libvisa.so";
    }
}

type ViStatus = i32;
type ViAccessMode = u32;
type ViSession = u32;
type ViObject = u32;
type ViFindList = u32;
type ViUInt32 = u32;

const DESC_BUFFER_LEN: usize = 256;

#[allow(non_snake_case)]
#[derive(Clone, WrapperApi)]
struct Api {
    viOpen: unsafe extern "C" fn(
        session: ViSession,
        rsrc: *const c_char,
        access_mode: ViAccessMode,
        timeout: u32,
        vi: *mut ViObject,
    ) -> ViStatus,
    viOpenDefaultRM: unsafe extern "C" fn(vi: *mut ViSession) -> ViStatus,
    viClose: unsafe extern "C" fn(vi: ViObject) -> ViStatus,
    viFindRsrc: unsafe extern "C" fn(
        session: ViSession,
        expr: *const c_char,
        find_list: *mut ViFindList,
        ret_cnt: *mut ViUInt32,
        desc: *mut c_char,
    ) -> ViStatus,
    viFindNext: unsafe extern "C" fn(find_list: ViFindList, desc: *mut c_char) -> ViStatus,
    viStatusDesc: unsafe extern "C" fn(vi: ViObject, status: ViStatus, value: *mut c_char) -> ViStatus,
    viRead: unsafe extern "C" fn(vi: ViSession, buf: *mut u8, cnt: u32, cnt_ret: *mut u32) -> ViStatus,
    viWrite: unsafe extern "C" fn(vi: ViSession, buf: *const u8, cnt: u32, cnt_ret: *mut u32) -> ViStatus,
}

/// Handle to the loaded VISA library. Clones share the same loaded
/// library, which stays loaded until the last clone is dropped.
#[derive(Clone)]
pub struct VisaLibrary {
    api: Arc<Container<Api>>,
}

impl VisaLibrary {
    /// Load the VISA shared library from `path`, falling back to the
    /// platform default library name if no path is given.
    pub fn load(path: Option<&str>) -> crate::Result<Self> {
        let path = path.unwrap_or(DEFAULT_LIBRARY);
        let api: Container<Api> = unsafe { Container::load(path) }?;
        Ok(Self { api: Arc::new(api) })
    }

    /// Open the default resource manager session.
    pub fn open_default_manager(&self) -> VisaResult<ResourceManager> {
        let mut rm: ViSession = 0;
        let status = unsafe { self.api.viOpenDefaultRM(&mut rm as *mut ViSession) };
        if status < 0 {
            return Err(self.error(0, status));
        }
        Ok(ResourceManager {
            lib: self.clone(),
            rm,
        })
    }

    fn describe_status(&self, session: ViObject, status: ViStatus) -> String {
        let mut data = [0 as c_char; 512];
        unsafe {
            let ret = self.api.viStatusDesc(session, status, data.as_mut_ptr());
            if ret < 0 {
                return format!("status code {}", status);
            }
            CStr::from_ptr(data.as_ptr()).to_string_lossy().into_owned()
        }
    }

    fn error(&self, session: ViObject, status: ViStatus) -> VisaError {
        VisaError::new(status, self.describe_status(session, status))
    }
}

/// The default VISA resource manager. Owns its session for the lifetime
/// of the struct; enumeration and session opening go through it.
pub struct ResourceManager {
    lib: VisaLibrary,
    rm: ViSession,
}

impl ResourceManager {
    /// Enumerate resources matching `filter` (e.g. `?*INSTR`), in the
    /// order the driver reports them. The order is driver-defined and
    /// not re-sorted here.
    pub fn find_resources(&self, filter: &str) -> VisaResult<Vec<String>> {
        let expr = CString::new(filter).unwrap();
        let mut find_list: ViFindList = 0;
        let mut count: ViUInt32 = 0;
        let mut desc = [0 as c_char; DESC_BUFFER_LEN];
        let status = unsafe {
            self.lib.api.viFindRsrc(
                self.rm,
                expr.as_ptr(),
                &mut find_list as *mut ViFindList,
                &mut count as *mut ViUInt32,
                desc.as_mut_ptr(),
            )
        };
        if status < 0 {
            return Err(self.lib.error(self.rm, status));
        }
        let mut resources = Vec::with_capacity(count as usize);
        if count > 0 {
            resources.push(read_desc(&desc));
            for _ in 1..count {
                let status = unsafe { self.lib.api.viFindNext(find_list, desc.as_mut_ptr()) };
                if status < 0 {
                    log::warn!(
                        "resource enumeration stopped early: {}",
                        self.lib.error(self.rm, status)
                    );
                    break;
                }
                resources.push(read_desc(&desc));
            }
        }
        let status = unsafe { self.lib.api.viClose(find_list) };
        if status < 0 {
            log::warn!("failed to close find list: {}", self.lib.error(self.rm, status));
        }
        Ok(resources)
    }

    /// Open a session to the resource at `addr`. `timeout` is the open
    /// timeout in seconds; `None` means the driver decides.
    pub fn open_session(&self, addr: &str, timeout: Option<f32>) -> VisaResult<Instrument> {
        let cstr = CString::new(addr).unwrap();
        let tmo = if let Some(tmo) = timeout {
            (tmo * 1000.0).round() as u32
        } else {
            0
        };
        let mut handle: ViObject = 0;
        let status = unsafe {
            self.lib
                .api
                .viOpen(self.rm, cstr.as_ptr(), 0, tmo, &mut handle as *mut ViObject)
        };
        if status < 0 {
            return Err(self.lib.error(self.rm, status));
        }
        Ok(Instrument {
            lib: self.lib.clone(),
            vi: handle,
            addr: addr.to_string(),
        })
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        let status = unsafe { self.lib.api.viClose(self.rm) };
        if status < 0 {
            log::warn!(
                "failed to close resource manager: {}",
                self.lib.error(self.rm, status)
            );
        }
    }
}

fn read_desc(desc: &[c_char; DESC_BUFFER_LEN]) -> String {
    unsafe { CStr::from_ptr(desc.as_ptr()).to_string_lossy().into_owned() }
}

/// One open session to an instrument. Closed on drop.
pub struct Instrument {
    lib: VisaLibrary,
    vi: ViSession,
    addr: String,
}

impl Instrument {
    /// Read at most `max_len` bytes. Returns exactly the bytes the
    /// driver reports as read, not the full buffer.
    pub fn read(&self, max_len: usize) -> VisaResult<Vec<u8>> {
        let mut data = vec![0u8; max_len];
        let mut actually_read = 0_u32;
        let status = unsafe {
            self.lib.api.viRead(
                self.vi,
                data.as_mut_ptr(),
                max_len as u32,
                &mut actually_read as *mut u32,
            )
        };
        if status < 0 {
            return Err(self.lib.error(self.vi, status));
        }
        data.truncate(actually_read as usize);
        Ok(data)
    }

    pub fn write(&self, data: &[u8]) -> VisaResult<usize> {
        let mut actually_written = 0_u32;
        let status = unsafe {
            self.lib.api.viWrite(
                self.vi,
                data.as_ptr(),
                data.len() as u32,
                &mut actually_written as *mut u32,
            )
        };
        if status < 0 {
            return Err(self.lib.error(self.vi, status));
        }
        Ok(actually_written as usize)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Drop for Instrument {
    fn drop(&mut self) {
        let status = unsafe { self.lib.api.viClose(self.vi) };
        if status < 0 {
            log::warn!(
                "failed to close instrument `{}`: {}",
                self.addr,
                self.lib.error(self.vi, status)
            );
        }
    }
}
