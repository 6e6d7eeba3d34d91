// SPDX-License-Identifier: Apache-2.0

//! Translation of host signals to the bridge numbering

use crate::{Client, Error, Result};

use libc::c_int;
use wicket::message::Writer;
use wicket::signal::{SigInfo, Signal};

const MAP: [(c_int, Signal); 29] = [
    (libc::SIGHUP, Signal::Hup),
    (libc::SIGINT, Signal::Int),
    (libc::SIGQUIT, Signal::Quit),
    (libc::SIGILL, Signal::Ill),
    (libc::SIGTRAP, Signal::Trap),
    (libc::SIGABRT, Signal::Abrt),
    (libc::SIGBUS, Signal::Bus),
    (libc::SIGFPE, Signal::Fpe),
    (libc::SIGKILL, Signal::Kill),
    (libc::SIGUSR1, Signal::Usr1),
    (libc::SIGSEGV, Signal::Segv),
    (libc::SIGUSR2, Signal::Usr2),
    (libc::SIGPIPE, Signal::Pipe),
    (libc::SIGALRM, Signal::Alrm),
    (libc::SIGTERM, Signal::Term),
    (libc::SIGCHLD, Signal::Chld),
    (libc::SIGCONT, Signal::Cont),
    (libc::SIGSTOP, Signal::Stop),
    (libc::SIGTSTP, Signal::Tstp),
    (libc::SIGTTIN, Signal::Ttin),
    (libc::SIGTTOU, Signal::Ttou),
    (libc::SIGURG, Signal::Urg),
    (libc::SIGXCPU, Signal::Xcpu),
    (libc::SIGXFSZ, Signal::Xfsz),
    (libc::SIGVTALRM, Signal::Vtalrm),
    (libc::SIGPROF, Signal::Prof),
    (libc::SIGWINCH, Signal::Winch),
    (libc::SIGIO, Signal::Io),
    (libc::SIGSYS, Signal::Sys),
];

/// The bridge signal of a host signal number
pub fn from_host(signum: c_int) -> Option<Signal> {
    MAP.iter().find(|(h, _)| *h == signum).map(|(_, s)| *s)
}

/// The host signal number of a bridge signal
pub fn to_host(signal: Signal) -> c_int {
    MAP.iter()
        .find(|(_, s)| *s == signal)
        .map(|(h, _)| *h)
        .unwrap_or(0)
}

/// Encodes a host signal for [`Client::deliver_signal`].
pub fn encode(signum: c_int, code: c_int) -> Result<Writer> {
    let signal = from_host(signum)
        .ok_or_else(|| Error::InvalidArgument(format!("signal {} has no bridge number", signum)))?;

    let mut writer = Writer::new();
    SigInfo {
        signum: signal as i32,
        code,
    }
    .encode(&mut writer);
    Ok(writer)
}

/// Re-raises host signal `signum` inside the enclave of `client`.
pub fn forward(client: &Client, signum: c_int, code: c_int) -> Result<()> {
    client.deliver_signal(&encode(signum, code)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    use wicket::message::Reader;

    #[test]
    fn every_signal_maps_back() {
        for signal in Signal::ALL {
            assert_eq!(from_host(to_host(signal)), Some(signal));
        }
    }

    #[test]
    fn unknown_signal() {
        assert_eq!(from_host(0), None);
        assert!(matches!(encode(0, 0), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn encoding() {
        let writer = encode(libc::SIGUSR2, 7).unwrap();
        let mut reader = Reader::deserialize(&writer.to_vec()).unwrap();
        assert_eq!(
            SigInfo::decode(&mut reader),
            Ok(SigInfo {
                signum: Signal::Usr2 as i32,
                code: 7
            })
        );
    }
}
