//! Pseudo-fs de processos (`/proc`).
//!
//! O conteúdo é sintetizado NO OPEN e servido do buffer do handle: uma
//! leitura longa vê um snapshot consistente mesmo que os contadores andem.
//!
//! Arquivos: `meminfo`, `cpuinfo`, `uptime`, `stat`, `version` e, por
//! processo vivo, `<pid>/status`.

use super::vfs::ops::{DirEntry, FileType, FsError, FsOps, NodeHandle, OpenFlags, Stat};
use crate::core::time::{self, TICK_HZ};
use crate::sched::task::{self, ProcState, MAX_PROCS};
use crate::sync::Spinlock;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

const MAX_HANDLES: usize = 32;

/// O pseudo-fs de processos.
pub struct ProcFs {
    handles: Spinlock<[Option<Vec<u8>>; MAX_HANDLES]>,
}

impl ProcFs {
    pub fn new() -> Self {
        Self {
            handles: Spinlock::new([const { None }; MAX_HANDLES]),
        }
    }
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new()
    }
}

fn state_name(s: ProcState) -> &'static str {
    match s {
        ProcState::Unused => "unused",
        ProcState::Ready => "ready",
        ProcState::Running => "running",
        ProcState::Blocked => "blocked",
        ProcState::Sleeping => "sleeping",
        ProcState::Zombie => "zombie",
    }
}

fn gen_meminfo() -> String {
    let st = crate::mm::stats();
    format!(
        "MemTotal: {} kB\nMemFree: {} kB\nMemUsed: {} kB\nBuffers: 0 kB\nCached: 0 kB\n",
        st.total_bytes / 1024,
        st.free_bytes / 1024,
        st.used_bytes / 1024
    )
}

fn gen_uptime() -> String {
    let up = time::jiffies();
    let idle = task::TABLE.lock().slots[0].cpu_ticks;
    let to_secs = |ticks: u64| (ticks / TICK_HZ, (ticks % TICK_HZ) * 100 / TICK_HZ);
    let (us, uc) = to_secs(up);
    let (is, ic) = to_secs(idle);
    format!("{}.{:02} {}.{:02}\n", us, uc, is, ic)
}

fn gen_stat() -> String {
    let t = task::TABLE.lock();
    let idle = t.slots[0].cpu_ticks;
    let busy: u64 = t.slots[1..].iter().map(|p| p.cpu_ticks).sum();
    format!(
        "cpu {} 0 0 {} 0 0 0 0 0 0\nprocesses {}\nprocs_running {}\nctxt {}\n",
        busy,
        idle,
        t.n_alive(),
        t.n_ready(),
        t.switch_count
    )
}

fn gen_version() -> String {
    String::from("Brasa OS version 0.1.0 (kernel brasa x86_64)\n")
}

fn gen_cpuinfo() -> String {
    let vendor = cpu_vendor();
    format!(
        "processor : 0\nvendor_id : {}\nmodel name : x86_64\ncpu MHz : unknown\n",
        vendor
    )
}

fn cpu_vendor() -> String {
    #[cfg(target_arch = "x86_64")]
    {
        let r = unsafe { core::arch::x86_64::__cpuid(0) };
        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&r.ebx.to_le_bytes());
        bytes[4..8].copy_from_slice(&r.edx.to_le_bytes());
        bytes[8..12].copy_from_slice(&r.ecx.to_le_bytes());
        return String::from_utf8_lossy(&bytes).into_owned();
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        String::from("unknown")
    }
}

fn gen_pid_status(pid: usize) -> Result<String, FsError> {
    let t = task::TABLE.lock();
    if pid >= MAX_PROCS || t.slots[pid].state == ProcState::Unused {
        return Err(FsError::NotFound);
    }
    let p = &t.slots[pid];
    Ok(format!(
        "Name:\t{}\nState:\t{}\nPid:\t{}\nPPid:\t{}\nPriority:\t{}\nCpuTime:\t{}\n",
        p.name(),
        state_name(p.state),
        p.pid,
        p.parent,
        p.prio as u8,
        p.cpu_ticks
    ))
}

/// Sintetiza o conteúdo de um caminho.
fn generate(path: &str) -> Result<String, FsError> {
    let trimmed = path.trim_matches('/');
    match trimmed {
        "meminfo" => Ok(gen_meminfo()),
        "uptime" => Ok(gen_uptime()),
        "stat" => Ok(gen_stat()),
        "version" => Ok(gen_version()),
        "cpuinfo" => Ok(gen_cpuinfo()),
        _ => {
            // <pid>/status
            let mut parts = trimmed.split('/');
            let pid: usize = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or(FsError::NotFound)?;
            match parts.next() {
                Some("status") if parts.next().is_none() => gen_pid_status(pid),
                _ => Err(FsError::NotFound),
            }
        }
    }
}

impl FsOps for ProcFs {
    fn open(&self, path: &str, flags: OpenFlags) -> Result<NodeHandle, FsError> {
        if flags.writable() {
            return Err(FsError::NotSupported);
        }
        let content = generate(path)?;
        let mut handles = self.handles.lock();
        let slot = handles
            .iter()
            .position(|h| h.is_none())
            .ok_or(FsError::NoSpace)?;
        handles[slot] = Some(content.into_bytes());
        Ok(slot)
    }

    fn close(&self, handle: NodeHandle) -> Result<(), FsError> {
        let mut handles = self.handles.lock();
        if handle < MAX_HANDLES {
            handles[handle] = None;
        }
        Ok(())
    }

    fn read(&self, handle: NodeHandle, offset: u64, buf: &mut [u8]) -> Result<usize, FsError> {
        let handles = self.handles.lock();
        let data = handles
            .get(handle)
            .and_then(|h| h.as_ref())
            .ok_or(FsError::BadHandle)?;
        let off = offset as usize;
        if off >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - off);
        buf[..n].copy_from_slice(&data[off..off + n]);
        Ok(n)
    }

    fn write(&self, _handle: NodeHandle, _offset: u64, _buf: &[u8]) -> Result<usize, FsError> {
        Err(FsError::NotSupported)
    }

    fn fstat(&self, handle: NodeHandle) -> Result<Stat, FsError> {
        let handles = self.handles.lock();
        let data = handles
            .get(handle)
            .and_then(|h| h.as_ref())
            .ok_or(FsError::BadHandle)?;
        Ok(Stat {
            mode: FileType::Regular.mode_bits() | 0o444,
            nlink: 1,
            size: data.len() as u64,
            inode: handle as u64,
            ..Default::default()
        }
        .finish())
    }

    fn readdir(&self, path: &str, out: &mut [DirEntry]) -> Result<usize, FsError> {
        let trimmed = path.trim_matches('/');
        let mut count = 0;
        let mut push = |e: DirEntry, count: &mut usize| {
            if *count < out.len() {
                out[*count] = e;
                *count += 1;
            }
        };
        if trimmed.is_empty() {
            for (i, name) in ["meminfo", "cpuinfo", "uptime", "stat", "version"]
                .iter()
                .enumerate()
            {
                push(DirEntry::new(i as u64, FileType::Regular, name), &mut count);
            }
            let t = task::TABLE.lock();
            for pid in 0..MAX_PROCS {
                if t.slots[pid].state != ProcState::Unused {
                    push(
                        DirEntry::new(
                            (100 + pid) as u64,
                            FileType::Directory,
                            &format!("{}", pid),
                        ),
                        &mut count,
                    );
                }
            }
            return Ok(count);
        }
        // Diretório por-pid
        let pid: usize = trimmed.parse().map_err(|_| FsError::NotFound)?;
        let t = task::TABLE.lock();
        if pid >= MAX_PROCS || t.slots[pid].state == ProcState::Unused {
            return Err(FsError::NotFound);
        }
        push(DirEntry::new(1, FileType::Regular, "status"), &mut count);
        Ok(count)
    }

    fn mkdir(&self, _path: &str) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }

    fn stat(&self, path: &str) -> Result<Stat, FsError> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() || trimmed.parse::<usize>().is_ok() {
            return Ok(Stat {
                mode: FileType::Directory.mode_bits() | 0o555,
                nlink: 2,
                ..Default::default()
            }
            .finish());
        }
        let content = generate(path)?;
        Ok(Stat {
            mode: FileType::Regular.mode_bits() | 0o444,
            nlink: 1,
            size: content.len() as u64,
            ..Default::default()
        }
        .finish())
    }

    fn create(&self, _path: &str, _ftype: FileType, _perms: u16) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }

    fn delete(&self, _path: &str) -> Result<(), FsError> {
        Err(FsError::NotSupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meminfo_format() {
        let _g = task::test_guard();
        let fs = ProcFs::new();
        let h = fs.open("/meminfo", OpenFlags::empty()).unwrap();
        let mut buf = [0u8; 256];
        let n = fs.read(h, 0, &mut buf).unwrap();
        let text = core::str::from_utf8(&buf[..n]).unwrap();
        assert!(text.starts_with("MemTotal: "));
        assert!(text.contains("MemFree: "));
        assert!(text.contains("Buffers: 0 kB"));
        fs.close(h).unwrap();
    }

    #[test]
    fn test_uptime_two_decimals() {
        let _g = task::test_guard();
        task::test_reset();
        task::init();
        let fs = ProcFs::new();
        let h = fs.open("/uptime", OpenFlags::empty()).unwrap();
        let mut buf = [0u8; 64];
        let n = fs.read(h, 0, &mut buf).unwrap();
        let text = core::str::from_utf8(&buf[..n]).unwrap().trim();
        let mut parts = text.split(' ');
        let a = parts.next().unwrap();
        let b = parts.next().unwrap();
        assert_eq!(a.split('.').nth(1).unwrap().len(), 2);
        assert_eq!(b.split('.').nth(1).unwrap().len(), 2);
        fs.close(h).unwrap();
    }

    #[test]
    fn test_pid_status() {
        let _g = task::test_guard();
        task::test_reset();
        task::init();
        let pid = task::create_process("demo", 0x1000, crate::sched::Priority::High).unwrap();
        let fs = ProcFs::new();
        let path = format!("/{}/status", pid);
        let h = fs.open(&path, OpenFlags::empty()).unwrap();
        let mut buf = [0u8; 256];
        let n = fs.read(h, 0, &mut buf).unwrap();
        let text = core::str::from_utf8(&buf[..n]).unwrap();
        assert!(text.contains("Name:\tdemo"));
        assert!(text.contains("State:\tready"));
        assert!(text.contains("Priority:\t1"));
        fs.close(h).unwrap();
    }

    #[test]
    fn test_missing_pid_is_enoent() {
        let _g = task::test_guard();
        task::test_reset();
        task::init();
        let fs = ProcFs::new();
        assert!(matches!(
            fs.open("/63/status", OpenFlags::empty()),
            Err(FsError::NotFound)
        ));
    }

    #[test]
    fn test_write_rejected() {
        let _g = task::test_guard();
        let fs = ProcFs::new();
        assert!(matches!(
            fs.open("/meminfo", OpenFlags::RDWR),
            Err(FsError::NotSupported)
        ));
    }

    #[test]
    fn test_stat_line_has_ctxt() {
        let _g = task::test_guard();
        task::test_reset();
        task::init();
        let fs = ProcFs::new();
        let h = fs.open("/stat", OpenFlags::empty()).unwrap();
        let mut buf = [0u8; 256];
        let n = fs.read(h, 0, &mut buf).unwrap();
        let text = core::str::from_utf8(&buf[..n]).unwrap();
        assert!(text.starts_with("cpu "));
        assert!(text.contains("\nctxt "));
        fs.close(h).unwrap();
    }
}
