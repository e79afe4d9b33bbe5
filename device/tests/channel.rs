use mppkit_device::sys::{DeviceProbe, Fault, MemoryDevice};
use mppkit_device::{
    ClientType, DevCmd, Device, DeviceConfig, DeviceError, IoctlCmd, Op, RegBuf, RegRdCfg,
    RegWrCfg, SetInfoCfg,
};
use std::time::Duration;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn memory_channel() -> (Device, DeviceProbe) {
    init_logger();
    let dev = MemoryDevice::new(256);
    let probe = dev.probe();
    let channel = Device::with_transport(ClientType::Vdpu2, Box::new(dev), Duration::from_millis(20));
    (channel, probe)
}

#[test]
fn empty_submit_is_a_noop() {
    let (mut dev, probe) = memory_channel();
    assert_eq!(dev.submit(), Ok(()));
    assert_eq!(probe.sent(), 0);
    assert_eq!(dev.in_flight(), 0);
}

#[test]
fn poll_without_submit_is_invalid_state() {
    let (mut dev, _probe) = memory_channel();
    assert!(matches!(dev.poll(), Err(DeviceError::InvalidState(_))));

    // an empty submit does not arm a poll either
    dev.submit().unwrap();
    assert!(matches!(dev.poll(), Err(DeviceError::InvalidState(_))));
}

#[test]
fn nothing_reaches_hardware_before_submit() {
    let (mut dev, probe) = memory_channel();
    dev.reg_write(&[1, 2, 3, 4], 0).unwrap();
    dev.set_info(2, 0, 42).unwrap();
    assert_eq!(dev.pending(), 2);
    assert_eq!(probe.sent(), 0);
    assert_eq!(probe.word(0), Some(0));

    dev.submit().unwrap();
    assert_eq!(dev.pending(), 0);
    assert_eq!(probe.word(0), Some(0x0403_0201));
    assert_eq!(
        probe.info(),
        vec![SetInfoCfg {
            kind: 2,
            flag: 0,
            data: 42
        }]
    );
}

#[test]
fn reads_are_filled_after_poll() {
    let (mut dev, _probe) = memory_channel();
    let regs: Vec<u8> = (0u8..16).collect();
    dev.reg_write(&regs, 0x20).unwrap();
    dev.reg_offset(9, 0x100).unwrap();
    let out = RegBuf::new(8);
    dev.reg_read(&out, 8, 0x20).unwrap();

    dev.submit().unwrap();
    assert_eq!(out.to_vec(), vec![0; 8]);
    assert_eq!(dev.poll(), Ok(MemoryDevice::STATUS_DONE));
    assert_eq!(out.word(0), Some(0x0302_0100));
    // register 9 is bytes 0x24..0x28, patched by 0x100
    assert_eq!(out.word(4), Some(0x0706_0504 + 0x100));
    assert_eq!(dev.in_flight(), 0);
}

#[test]
fn zero_size_and_missing_buffers_are_rejected() {
    let (mut dev, _probe) = memory_channel();
    assert!(matches!(dev.reg_write(&[], 0), Err(DeviceError::InvalidArgument(_))));
    assert!(matches!(
        dev.reg_read(&RegBuf::new(4), 0, 0),
        Err(DeviceError::InvalidArgument(_))
    ));
    assert!(matches!(
        dev.reg_read(&RegBuf::new(4), 8, 0),
        Err(DeviceError::InvalidArgument(_))
    ));
    assert!(matches!(
        dev.ioctl(DevCmd::RegWr(RegWrCfg {
            reg: None,
            size: 4,
            offset: 0
        })),
        Err(DeviceError::InvalidArgument(_))
    ));
    assert!(matches!(
        dev.ioctl(DevCmd::RegRd(RegRdCfg {
            reg: None,
            size: 4,
            offset: 0
        })),
        Err(DeviceError::InvalidArgument(_))
    ));
    assert_eq!(dev.pending(), 0);
}

#[test]
fn ioctl_maps_onto_channel_operations() {
    let (mut dev, probe) = memory_channel();
    let regs = 0xdead_beef_u32.to_le_bytes();
    let cmds = [
        DevCmd::RegWr(RegWrCfg {
            reg: Some(&regs),
            size: 4,
            offset: 4,
        }),
        DevCmd::SetInfo(SetInfoCfg {
            kind: 1,
            flag: 1,
            data: 7,
        }),
    ];
    for cmd in cmds {
        assert!(matches!(cmd.cmd(), IoctlCmd::RegWr | IoctlCmd::SetInfo));
        assert_eq!(dev.ioctl(cmd), Ok(0));
    }
    assert_eq!(dev.ioctl(DevCmd::CmdSend), Ok(0));
    assert_eq!(dev.ioctl(DevCmd::CmdPoll), Ok(MemoryDevice::STATUS_DONE));
    assert_eq!(probe.word(1), Some(0xdead_beef));
    assert_eq!(
        probe.last_batch().map(|b| b.ops.len()),
        Some(2),
        "one command carries every queued op"
    );
    assert!(matches!(probe.last_batch().unwrap().ops[0], Op::Write { offset: 4, .. }));
}

#[test]
fn send_failure_keeps_queue_and_reports_io_error() {
    let (mut dev, probe) = memory_channel();
    probe.inject(Fault::SendFails);
    dev.reg_write(&[1, 0, 0, 0], 0).unwrap();
    assert!(matches!(dev.submit(), Err(DeviceError::DeviceIo(_))));
    assert_eq!(dev.pending(), 1);
    assert_eq!(dev.in_flight(), 0);

    dev.submit().unwrap();
    assert!(dev.poll().is_ok());
}

#[test]
fn failed_submit_leaves_registers_unchanged() {
    let (mut dev, probe) = memory_channel();
    dev.reg_write(&[0xaa, 0xbb, 0xcc, 0xdd], 0).unwrap();
    // runs past the end of the 256 byte register file
    dev.reg_write(&[1; 8], 252).unwrap();
    assert!(matches!(dev.submit(), Err(DeviceError::DeviceIo(_))));
    assert_eq!(probe.word(0), Some(0));
    assert_eq!(probe.sent(), 0);
    assert_eq!(dev.in_flight(), 0);
}

#[test]
fn truncate_pending_keeps_earlier_ops() {
    let (mut dev, probe) = memory_channel();
    dev.set_info(4, 0, 0xabc).unwrap();
    let mark = dev.pending();
    let dropped = RegBuf::new(4);
    dev.reg_write(&[9, 0, 0, 0], 0).unwrap();
    dev.reg_read(&dropped, 4, 0).unwrap();
    dev.truncate_pending(mark);
    assert_eq!(dev.pending(), 1);

    let kept = RegBuf::new(4);
    dev.reg_write(&[5, 0, 0, 0], 0).unwrap();
    dev.reg_read(&kept, 4, 0).unwrap();
    dev.submit().unwrap();
    assert_eq!(dev.poll(), Ok(MemoryDevice::STATUS_DONE));
    assert_eq!(kept.word(0), Some(5));
    assert_eq!(dropped.word(0), Some(0));
    assert_eq!(probe.info().len(), 1);

    // a mark past the queue leaves it alone
    dev.set_info(4, 0, 1).unwrap();
    dev.truncate_pending(8);
    assert_eq!(dev.pending(), 1);
}

#[test]
fn timeout_leaves_command_pollable() {
    let (mut dev, probe) = memory_channel();
    dev.reg_write(&[1, 0, 0, 0], 0).unwrap();
    dev.submit().unwrap();
    probe.inject(Fault::Hang);
    assert_eq!(dev.poll(), Err(DeviceError::Timeout(Duration::from_millis(20))));
    assert_eq!(dev.in_flight(), 1);
    assert!(dev.poll().is_ok());
}

#[test]
fn commands_complete_in_submission_order() {
    let (mut dev, probe) = memory_channel();
    dev.reg_write(&[1, 0, 0, 0], 0).unwrap();
    dev.submit().unwrap();
    probe.inject(Fault::Status(0x8));
    dev.reg_write(&[2, 0, 0, 0], 0).unwrap();
    dev.submit().unwrap();
    assert_eq!(dev.in_flight(), 2);
    // the status fault is consumed by the second command when it executes
    assert_eq!(dev.poll(), Ok(MemoryDevice::STATUS_DONE));
    assert_eq!(dev.poll(), Ok(0x8));
}

#[test]
fn close_is_safe_after_io_error() {
    let (mut dev, probe) = memory_channel();
    dev.reg_write(&[1, 0, 0, 0], 0).unwrap();
    dev.submit().unwrap();
    probe.inject(Fault::PollFails);
    assert!(matches!(dev.poll(), Err(DeviceError::DeviceIo(_))));
    assert_eq!(dev.close(), Ok(()));
    assert_eq!(dev.close(), Ok(()));
    assert!(probe.is_closed());
    assert_eq!(dev.submit(), Err(DeviceError::Closed));
}

#[test]
fn reset_voids_pending_and_in_flight_work() {
    let (mut dev, probe) = memory_channel();
    dev.reg_write(&[1, 0, 0, 0], 0).unwrap();
    dev.submit().unwrap();
    dev.reg_write(&[2, 0, 0, 0], 0).unwrap();
    dev.reset();
    assert_eq!(dev.pending(), 0);
    assert_eq!(dev.in_flight(), 0);
    assert_eq!(probe.in_flight(), 0);
    assert!(matches!(dev.poll(), Err(DeviceError::InvalidState(_))));

    // the next command completes on its own, not with the voided one
    let status = RegBuf::new(4);
    dev.reg_write(&[3, 0, 0, 0], 0).unwrap();
    dev.reg_read(&status, 4, 0).unwrap();
    dev.submit().unwrap();
    assert_eq!(dev.poll(), Ok(MemoryDevice::STATUS_DONE));
    assert_eq!(status.word(0), Some(3));
}

#[test]
fn open_memory_transport_from_config() {
    init_logger();
    let mut dev = Device::open(ClientType::JpegDec, &DeviceConfig::memory()).unwrap();
    assert_eq!(dev.client(), ClientType::JpegDec);
    assert_eq!(dev.poll_timeout(), Duration::from_millis(200));
    dev.reg_write(&[0; 4], 4092).unwrap();
    dev.submit().unwrap();
    assert!(dev.poll().is_ok());
}

#[cfg(unix)]
#[test]
fn open_missing_node_is_unavailable() {
    init_logger();
    let cfg = DeviceConfig {
        transport: mppkit_device::TransportKind::Node,
        node_path: "/nonexistent/mpp_service".into(),
        ..DeviceConfig::default()
    };
    assert!(matches!(
        Device::open(ClientType::Rkvdec, &cfg),
        Err(DeviceError::DeviceUnavailable(_))
    ));
}

#[cfg(unix)]
mod node {
    use super::init_logger;
    use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
    use mppkit_device::sys::NodeDevice;
    use mppkit_device::{ClientType, Device, DeviceError, RegBuf};
    use std::io::{Cursor, Read, Write};
    use std::os::unix::net::UnixStream;
    use std::time::{Duration, Instant};

    const DONE: u32 = 0x4d50_4344;
    const ACK: u32 = 0x4d50_4b41;
    const TIMEOUT: Duration = Duration::from_millis(50);
    // header, one 4 byte write, one read
    const WRITE_READ_LEN: usize = 12 + 16 + 12;

    fn node_channel() -> (Device, UnixStream) {
        init_logger();
        let (ours, peer) = UnixStream::pair().unwrap();
        ours.set_nonblocking(true).unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let node = NodeDevice::from_stream("socketpair", ClientType::Rkvdec, ours);
        (Device::with_transport(ClientType::Rkvdec, Box::new(node), TIMEOUT), peer)
    }

    fn write_then_read(dev: &mut Device, value: u32) -> RegBuf {
        let out = RegBuf::new(4);
        dev.reg_write(&value.to_le_bytes(), 0).unwrap();
        dev.reg_read(&out, 4, 0).unwrap();
        dev.submit().unwrap();
        out
    }

    fn recv(peer: &mut UnixStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0; len];
        peer.read_exact(&mut buf).unwrap();
        buf
    }

    fn done(status: u32, read: &[u8]) -> Vec<u8> {
        let mut rec = Vec::new();
        rec.write_u32::<LittleEndian>(DONE).unwrap();
        rec.write_u32::<LittleEndian>(status).unwrap();
        rec.write_u32::<LittleEndian>(1).unwrap();
        rec.write_u32::<LittleEndian>(u32::try_from(read.len()).unwrap()).unwrap();
        rec.extend_from_slice(read);
        rec
    }

    #[test]
    fn completion_in_two_chunks_is_decoded_once() {
        let (mut dev, mut peer) = node_channel();
        let out = write_then_read(&mut dev, 0x1234_5678);

        let batch = recv(&mut peer, WRITE_READ_LEN);
        let mut cur = Cursor::new(&batch);
        assert_eq!(cur.read_u32::<LittleEndian>().unwrap(), 0x4d50_5043);
        assert_eq!(cur.read_u32::<LittleEndian>().unwrap(), ClientType::Rkvdec.id());
        assert_eq!(cur.read_u32::<LittleEndian>().unwrap(), 2);

        let rec = done(0, &0x1234_5678_u32.to_le_bytes());
        peer.write_all(&rec[..7]).unwrap();
        assert_eq!(dev.poll(), Err(DeviceError::Timeout(TIMEOUT)));
        assert_eq!(dev.in_flight(), 1);

        peer.write_all(&rec[7..]).unwrap();
        assert_eq!(dev.poll(), Ok(0));
        assert_eq!(out.word(0), Some(0x1234_5678));
        assert_eq!(dev.in_flight(), 0);
    }

    #[test]
    fn silent_node_times_out() {
        let (mut dev, mut peer) = node_channel();
        let _out = write_then_read(&mut dev, 1);
        recv(&mut peer, WRITE_READ_LEN);

        let started = Instant::now();
        assert_eq!(dev.poll(), Err(DeviceError::Timeout(TIMEOUT)));
        let waited = started.elapsed();
        assert!(waited >= TIMEOUT);
        assert!(waited < Duration::from_secs(2), "poll blocked for {waited:?}");
        assert_eq!(dev.in_flight(), 1);
    }

    #[test]
    fn reset_discards_completions_until_acknowledged() {
        let (mut dev, mut peer) = node_channel();
        let _stale = write_then_read(&mut dev, 1);
        recv(&mut peer, WRITE_READ_LEN);

        dev.reset();
        let reset = recv(&mut peer, 12);
        let mut cur = Cursor::new(&reset);
        assert_eq!(cur.read_u32::<LittleEndian>().unwrap(), 0x4d50_5052);
        assert_eq!(cur.read_u32::<LittleEndian>().unwrap(), ClientType::Rkvdec.id());
        let token = cur.read_u32::<LittleEndian>().unwrap();

        let out = write_then_read(&mut dev, 3);
        recv(&mut peer, WRITE_READ_LEN);

        // the voided command completes late, then the ack, then the new one
        let mut reply = done(0x8, &[9; 4]);
        reply.write_u32::<LittleEndian>(ACK).unwrap();
        reply.write_u32::<LittleEndian>(token).unwrap();
        reply.extend(done(0, &3_u32.to_le_bytes()));
        peer.write_all(&reply).unwrap();

        assert_eq!(dev.poll(), Ok(0));
        assert_eq!(out.word(0), Some(3));
    }

    #[test]
    fn hostile_lengths_are_io_errors() {
        let (mut dev, mut peer) = node_channel();
        let _out = write_then_read(&mut dev, 1);
        recv(&mut peer, WRITE_READ_LEN);

        let mut rec = Vec::new();
        rec.write_u32::<LittleEndian>(DONE).unwrap();
        rec.write_u32::<LittleEndian>(0).unwrap();
        rec.write_u32::<LittleEndian>(u32::MAX).unwrap();
        peer.write_all(&rec).unwrap();
        assert!(matches!(dev.poll(), Err(DeviceError::DeviceIo(_))));
        assert_eq!(dev.in_flight(), 0);

        let _out = write_then_read(&mut dev, 2);
        recv(&mut peer, WRITE_READ_LEN);
        let mut rec = Vec::new();
        rec.write_u32::<LittleEndian>(DONE).unwrap();
        rec.write_u32::<LittleEndian>(0).unwrap();
        rec.write_u32::<LittleEndian>(1).unwrap();
        rec.write_u32::<LittleEndian>(0xffff_fff0).unwrap();
        peer.write_all(&rec).unwrap();
        assert!(matches!(dev.poll(), Err(DeviceError::DeviceIo(_))));
    }
}
