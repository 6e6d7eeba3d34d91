// SPDX-License-Identifier: Apache-2.0

use postern::backend::{Backend, BACKENDS};

use std::fmt::{self, Formatter};
use std::sync::Arc;

use clap::Args;
use libc::{uname, utsname};
use serde::Serialize;

/// Show details about backend support on this system
#[derive(Args, Debug)]
pub struct Options {
    #[clap(short, long)]
    /// Emit JSON rather than human-readable output
    json: bool,
}

#[derive(Serialize)]
struct Info<'a> {
    version: &'static str,
    abi_version: u32,
    table_digest: String,
    system_info: String,
    backends: &'a [Arc<dyn Backend>],
}

impl fmt::Display for Info<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fn icon(pass: bool) -> &'static str {
            match pass {
                true => "✔",
                false => "✗",
            }
        }

        writeln!(f, "postern version {}", self.version)?;
        writeln!(f, "Call table: ABI {} ({})", self.abi_version, self.table_digest)?;
        writeln!(f, "System Info: {}", self.system_info)?;

        for backend in self.backends {
            let data = backend.data();
            let pass = data.iter().all(|x| x.pass);

            writeln!(f, "{} Backend: {}", icon(pass), backend.name())?;

            for datum in &data {
                write!(f, "  {} {}", icon(datum.pass), datum.name)?;

                if let Some(ref info) = datum.info {
                    write!(f, ": {}", info)?;
                }
                writeln!(f)?;
            }

            for datum in &data {
                if let Some(mesg) = datum.mesg.as_ref() {
                    writeln!(f, "\n  {}\n", mesg)?;
                }
            }
        }
        Ok(())
    }
}

fn system_info() -> String {
    use std::{ffi::CStr, io, mem::MaybeUninit, os::raw::c_char, str::Utf8Error};

    fn utsname_to_string(mut utsname: utsname) -> Result<String, Utf8Error> {
        fn array_to_str<const N: usize>(array: &'_ mut [c_char; N]) -> Result<&'_ str, Utf8Error> {
            array[N - 1] = 0;
            unsafe { CStr::from_ptr(array.as_ptr()) }.to_str()
        }

        Ok(format!(
            "{} {} {} {}",
            array_to_str(&mut utsname.sysname)?,
            array_to_str(&mut utsname.release)?,
            array_to_str(&mut utsname.version)?,
            array_to_str(&mut utsname.machine)?,
        ))
    }

    let mut utsname = MaybeUninit::uninit();

    if unsafe { uname(utsname.as_mut_ptr()) } != 0 {
        format!("[{}]", io::Error::last_os_error())
    } else {
        utsname_to_string(unsafe { utsname.assume_init() })
            .unwrap_or_else(|e| format!("[utf8 error: {}]", e))
    }
}

impl Options {
    /// Display nicely-formatted info about each backend
    pub fn execute(self) -> anyhow::Result<()> {
        let info = Info {
            version: env!("CARGO_PKG_VERSION"),
            abi_version: wicket::ABI_VERSION,
            table_digest: format!("{:016x}", wicket::table_digest()),
            system_info: system_info(),
            backends: &BACKENDS,
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&info)?);
        } else {
            println!("{}", info);
        }

        Ok(())
    }
}

#[test]
fn test_info() {
    Options { json: true }.execute().unwrap();
    Options { json: false }.execute().unwrap();
}
