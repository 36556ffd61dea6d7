//! HopeRF RFM69 (SX1231) transmit driver.
//!
//! Register-level driver for the UKHASnet air profile: 869.5 MHz FSK at
//! 2 kbps with ±12 kHz deviation, a 3-byte preamble, sync word `2D AA` and
//! variable-length packets with CRC.
//!
//! The chip spends its life in sleep. [`Radio::send`] steps through
//! standby into transmit, waits for PacketSent and then drops back into
//! the mode the chip was in before the call.

use embedded_hal::blocking::spi::{Transfer, Write};
use embedded_hal::digital::v2::OutputPin;
use heapless::Vec;

use crate::config::MAX_PACKET_LEN;
use crate::radio::Radio;

/// Register addresses
mod reg {
    pub const FIFO: u8 = 0x00;
    pub const OPMODE: u8 = 0x01;
    pub const DATAMODUL: u8 = 0x02;
    pub const BITRATEMSB: u8 = 0x03;
    pub const BITRATELSB: u8 = 0x04;
    pub const FDEVMSB: u8 = 0x05;
    pub const FDEVLSB: u8 = 0x06;
    pub const FRFMSB: u8 = 0x07;
    pub const FRFMID: u8 = 0x08;
    pub const FRFLSB: u8 = 0x09;
    pub const VERSION: u8 = 0x10;
    pub const PALEVEL: u8 = 0x11;
    pub const RXBW: u8 = 0x19;
    pub const IRQFLAGS1: u8 = 0x27;
    pub const IRQFLAGS2: u8 = 0x28;
    pub const PREAMBLEMSB: u8 = 0x2C;
    pub const PREAMBLELSB: u8 = 0x2D;
    pub const SYNCCONFIG: u8 = 0x2E;
    pub const SYNCVALUE1: u8 = 0x2F;
    pub const SYNCVALUE2: u8 = 0x30;
    pub const PACKETCONFIG1: u8 = 0x37;
    pub const PAYLOADLENGTH: u8 = 0x38;
    pub const FIFOTHRESH: u8 = 0x3C;
    pub const PACKETCONFIG2: u8 = 0x3D;
    pub const TESTLNA: u8 = 0x58;
    pub const TESTDAGC: u8 = 0x6F;
}

/// IRQ flag bits
mod irq {
    /// IRQFLAGS1: requested mode is ready
    pub const MODE_READY: u8 = 0x80;
    /// IRQFLAGS2: packet transmission complete
    pub const PACKET_SENT: u8 = 0x08;
}

/// PALEVEL bits
mod pa {
    pub const PA0_ON: u8 = 0x80;
    pub const PA1_ON: u8 = 0x40;
    pub const PA2_ON: u8 = 0x20;
    pub const OUTPUT_POWER_MASK: u8 = 0x1F;
}

/// Set on the address byte for register writes
const WRITE_FLAG: u8 = 0x80;

/// Silicon revision reported by every RFM69 variant
const EXPECTED_VERSION: u8 = 0x24;

/// Register polls before giving up on a flag
const POLL_LIMIT: u32 = 100_000;

/// Longest payload accepted by `send`
pub const MAX_PAYLOAD: usize = MAX_PACKET_LEN;

/// Address byte, length byte and payload in one SPI transaction
const FIFO_FRAME: usize = MAX_PAYLOAD + 2;

/// UKHASnet register profile, applied in order on init
const UKHASNET_PROFILE: &[(u8, u8)] = &[
    // Sequencer on, listen off, standby
    (reg::OPMODE, Mode::Standby as u8),
    // Packet mode, FSK, no shaping
    (reg::DATAMODUL, 0x00),
    // 2000 bps
    (reg::BITRATEMSB, 0x3E),
    (reg::BITRATELSB, 0x80),
    // 12 kHz deviation
    (reg::FDEVMSB, 0x00),
    (reg::FDEVLSB, 0xC5),
    // 869.5 MHz
    (reg::FRFMSB, 0xD9),
    (reg::FRFMID, 0x60),
    (reg::FRFLSB, 0x12),
    // DCC 4%, 125 kHz channel filter
    (reg::RXBW, 0x42),
    (reg::PREAMBLEMSB, 0x00),
    (reg::PREAMBLELSB, 0x03),
    // Sync on, two bytes
    (reg::SYNCCONFIG, 0x88),
    (reg::SYNCVALUE1, 0x2D),
    (reg::SYNCVALUE2, 0xAA),
    // Variable length, CRC on
    (reg::PACKETCONFIG1, 0x90),
    (reg::PAYLOADLENGTH, 0x42),
    // Start TX as soon as the FIFO is not empty
    (reg::FIFOTHRESH, 0x8F),
    // 2-bit RX restart delay, auto restart
    (reg::PACKETCONFIG2, 0x12),
    // High sensitivity LNA
    (reg::TESTLNA, 0x2D),
    // Improved fading margin for low modulation index
    (reg::TESTDAGC, 0x30),
];

/// Operating modes (OPMODE bits 4:2, sequencer on, listen off)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    Sleep = 0x00,
    Standby = 0x04,
    Transmit = 0x0C,
}

/// Which power amplifiers the module has bonded out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaVariant {
    /// RFM69W / CW: PA0 only, -18..=13 dBm
    Rfm69W,
    /// RFM69HW / HCW: PA1 and PA2, -2..=17 dBm
    Rfm69Hw,
}

impl PaVariant {
    /// PALEVEL value for the requested power, clamped to the variant's range.
    pub fn pa_level(self, power_dbm: i8) -> u8 {
        match self {
            PaVariant::Rfm69W => {
                let p = power_dbm.clamp(-18, 13);
                pa::PA0_ON | ((p + 18) as u8 & pa::OUTPUT_POWER_MASK)
            }
            PaVariant::Rfm69Hw => {
                let p = power_dbm.clamp(-2, 17);
                if p <= 13 {
                    pa::PA1_ON | ((p + 18) as u8 & pa::OUTPUT_POWER_MASK)
                } else {
                    pa::PA1_ON | pa::PA2_ON | ((p + 14) as u8 & pa::OUTPUT_POWER_MASK)
                }
            }
        }
    }
}

/// Errors that can occur during RFM69 operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rfm69Error<E> {
    /// SPI bus error
    Spi(E),
    /// Version register did not read back as an RFM69
    UnknownVersion(u8),
    /// A status flag never came up
    Timeout,
    /// Payload longer than the FIFO frame allows
    PayloadTooLarge(usize),
}

/// RFM69 driver
///
/// Uses blocking SPI with manual chip-select control.
pub struct Rfm69<SPI, CS> {
    spi: SPI,
    cs: CS,
    variant: PaVariant,
    mode: Mode,
}

impl<SPI, CS, E> Rfm69<SPI, CS>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
{
    /// Create a new driver; the chip is assumed to be fresh out of reset (standby).
    pub fn new(spi: SPI, mut cs: CS, variant: PaVariant) -> Self {
        let _ = cs.set_high();

        Self {
            spi,
            cs,
            variant,
            mode: Mode::Standby,
        }
    }

    /// Give back the bus and chip-select pin
    pub fn release(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    fn read_register(&mut self, addr: u8) -> Result<u8, Rfm69Error<E>> {
        let mut buf = [addr & !WRITE_FLAG, 0];

        let _ = self.cs.set_low();
        let result = self.spi.transfer(&mut buf).map(|rx| rx[1]);
        let _ = self.cs.set_high();

        result.map_err(Rfm69Error::Spi)
    }

    fn write_register(&mut self, addr: u8, value: u8) -> Result<(), Rfm69Error<E>> {
        self.write_frame(&[addr | WRITE_FLAG, value])
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), Rfm69Error<E>> {
        let _ = self.cs.set_low();
        let result = self.spi.write(frame);
        let _ = self.cs.set_high();

        result.map_err(Rfm69Error::Spi)
    }

    /// Poll `addr` until any bit of `mask` is set
    fn wait_for_flag(&mut self, addr: u8, mask: u8) -> Result<(), Rfm69Error<E>> {
        for _ in 0..POLL_LIMIT {
            if self.read_register(addr)? & mask != 0 {
                return Ok(());
            }
        }
        Err(Rfm69Error::Timeout)
    }

    fn set_mode(&mut self, mode: Mode) -> Result<(), Rfm69Error<E>> {
        self.write_register(reg::OPMODE, mode as u8)?;
        self.mode = mode;

        // ModeReady is not meaningful in sleep
        if mode != Mode::Sleep {
            self.wait_for_flag(reg::IRQFLAGS1, irq::MODE_READY)?;
        }

        Ok(())
    }

    fn load_fifo(&mut self, data: &[u8]) -> Result<(), Rfm69Error<E>> {
        let mut frame: Vec<u8, FIFO_FRAME> = Vec::new();
        // Capacity is checked by the caller
        let _ = frame.push(reg::FIFO | WRITE_FLAG);
        let _ = frame.push(data.len() as u8);
        let _ = frame.extend_from_slice(data);

        self.write_frame(&frame)
    }
}

impl<SPI, CS, E> Radio for Rfm69<SPI, CS>
where
    SPI: Transfer<u8, Error = E> + Write<u8, Error = E>,
    CS: OutputPin,
{
    type Error = Rfm69Error<E>;

    fn init(&mut self) -> Result<(), Self::Error> {
        let version = self.read_register(reg::VERSION)?;
        if version != EXPECTED_VERSION {
            return Err(Rfm69Error::UnknownVersion(version));
        }

        for &(addr, value) in UKHASNET_PROFILE {
            self.write_register(addr, value)?;
        }

        self.set_mode(Mode::Standby)
    }

    fn set_sleep_mode(&mut self) -> Result<(), Self::Error> {
        self.set_mode(Mode::Sleep)
    }

    fn send(&mut self, data: &[u8], power_dbm: i8) -> Result<(), Self::Error> {
        if data.len() > MAX_PAYLOAD {
            return Err(Rfm69Error::PayloadTooLarge(data.len()));
        }

        let previous = self.mode;

        self.set_mode(Mode::Standby)?;
        self.load_fifo(data)?;
        self.write_register(reg::PALEVEL, self.variant.pa_level(power_dbm))?;
        self.set_mode(Mode::Transmit)?;

        let sent = self.wait_for_flag(reg::IRQFLAGS2, irq::PACKET_SENT);

        // Leave transmit even if PacketSent never arrived
        self.set_mode(previous)?;
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;

    /// Register-file model of the chip behind the SPI bus
    struct FakeRfm69 {
        regs: [u8; 0x80],
        fifo: std::vec::Vec<u8>,
        opmodes: std::vec::Vec<u8>,
        packet_sent: bool,
    }

    impl FakeRfm69 {
        fn new(version: u8) -> Self {
            let mut regs = [0u8; 0x80];
            regs[reg::VERSION as usize] = version;
            regs[reg::IRQFLAGS1 as usize] = irq::MODE_READY;

            Self {
                regs,
                fifo: std::vec::Vec::new(),
                opmodes: std::vec::Vec::new(),
                packet_sent: true,
            }
        }
    }

    impl Transfer<u8> for FakeRfm69 {
        type Error = Infallible;

        fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], Self::Error> {
            let addr = (words[0] & !WRITE_FLAG) as usize;
            for i in 1..words.len() {
                let r = addr + i - 1;
                words[i] = if r == reg::IRQFLAGS2 as usize {
                    if self.packet_sent { irq::PACKET_SENT } else { 0 }
                } else {
                    self.regs[r]
                };
            }
            Ok(words)
        }
    }

    impl Write<u8> for FakeRfm69 {
        type Error = Infallible;

        fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
            assert_ne!(words[0] & WRITE_FLAG, 0, "write without the write flag");
            let addr = words[0] & !WRITE_FLAG;

            if addr == reg::FIFO {
                self.fifo.extend_from_slice(&words[1..]);
                return Ok(());
            }

            for (i, &value) in words[1..].iter().enumerate() {
                let r = addr as usize + i;
                self.regs[r] = value;
                if r == reg::OPMODE as usize {
                    self.opmodes.push(value);
                }
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeCs {
        low: bool,
        selects: usize,
    }

    impl OutputPin for FakeCs {
        type Error = Infallible;

        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.low = true;
            self.selects += 1;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.low = false;
            Ok(())
        }
    }

    fn radio(variant: PaVariant) -> Rfm69<FakeRfm69, FakeCs> {
        Rfm69::new(FakeRfm69::new(EXPECTED_VERSION), FakeCs::default(), variant)
    }

    #[test]
    fn test_init_rejects_unknown_version() {
        let mut radio = Rfm69::new(FakeRfm69::new(0x00), FakeCs::default(), PaVariant::Rfm69W);
        assert_eq!(radio.init(), Err(Rfm69Error::UnknownVersion(0x00)));

        let (chip, _) = radio.release();
        assert!(chip.opmodes.is_empty());
    }

    #[test]
    fn test_init_applies_ukhasnet_profile() {
        let mut radio = radio(PaVariant::Rfm69W);
        radio.init().unwrap();
        assert_eq!(radio.mode(), Mode::Standby);

        let (chip, cs) = radio.release();
        assert_eq!(&chip.regs[reg::FRFMSB as usize..=reg::FRFLSB as usize], &[0xD9, 0x60, 0x12]);
        assert_eq!(chip.regs[reg::SYNCVALUE1 as usize], 0x2D);
        assert_eq!(chip.regs[reg::SYNCVALUE2 as usize], 0xAA);
        assert_eq!(chip.regs[reg::PACKETCONFIG1 as usize], 0x90);
        assert_eq!(chip.regs[reg::FIFOTHRESH as usize], 0x8F);
        assert!(!cs.low);
    }

    #[test]
    fn test_send_fills_fifo_and_returns_to_sleep() {
        let mut radio = radio(PaVariant::Rfm69W);
        radio.init().unwrap();
        radio.set_sleep_mode().unwrap();

        radio.send(b"1aV3180T21.4[JH9]", 10).unwrap();
        assert_eq!(radio.mode(), Mode::Sleep);

        let (chip, cs) = radio.release();
        assert_eq!(chip.fifo[0], 17);
        assert_eq!(&chip.fifo[1..], b"1aV3180T21.4[JH9]");
        assert_eq!(chip.regs[reg::PALEVEL as usize], 0x80 | 28);
        assert_eq!(
            &chip.opmodes[chip.opmodes.len() - 4..],
            &[
                Mode::Sleep as u8,
                Mode::Standby as u8,
                Mode::Transmit as u8,
                Mode::Sleep as u8
            ]
        );
        assert!(!cs.low);
        assert!(cs.selects > 0);
    }

    #[test]
    fn test_send_short_payload() {
        let mut radio = radio(PaVariant::Rfm69W);
        radio.init().unwrap();

        radio.send(b"1a", 5).unwrap();

        let (chip, _) = radio.release();
        assert_eq!(chip.fifo, b"\x021a".to_vec());
        assert_eq!(chip.opmodes.last(), Some(&(Mode::Standby as u8)));
    }

    #[test]
    fn test_send_rejects_oversized_payload() {
        let mut radio = radio(PaVariant::Rfm69W);
        radio.init().unwrap();

        let data = [b'x'; MAX_PAYLOAD + 1];
        assert_eq!(
            radio.send(&data, 10),
            Err(Rfm69Error::PayloadTooLarge(MAX_PAYLOAD + 1))
        );

        let (chip, _) = radio.release();
        assert!(chip.fifo.is_empty());
    }

    #[test]
    fn test_send_timeout_leaves_transmit() {
        let mut chip = FakeRfm69::new(EXPECTED_VERSION);
        chip.packet_sent = false;
        let mut radio = Rfm69::new(chip, FakeCs::default(), PaVariant::Rfm69Hw);
        radio.init().unwrap();
        radio.set_sleep_mode().unwrap();

        assert_eq!(radio.send(b"1a", 5), Err(Rfm69Error::Timeout));
        assert_eq!(radio.mode(), Mode::Sleep);
    }

    #[test]
    fn test_pa_levels() {
        assert_eq!(PaVariant::Rfm69W.pa_level(13), 0x9F);
        assert_eq!(PaVariant::Rfm69W.pa_level(-18), 0x80);
        assert_eq!(PaVariant::Rfm69W.pa_level(20), 0x9F);

        assert_eq!(PaVariant::Rfm69Hw.pa_level(5), 0x40 | 23);
        assert_eq!(PaVariant::Rfm69Hw.pa_level(-5), 0x40 | 16);
        assert_eq!(PaVariant::Rfm69Hw.pa_level(17), 0x7F);
        assert_eq!(PaVariant::Rfm69Hw.pa_level(20), 0x7F);
        assert_eq!(PaVariant::Rfm69Hw.pa_level(14), 0x60 | 28);
    }
}
