// Copyright 2025 The Uartdma Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Memory-Mapped Back End
//!
//! [`SerialHw`] over STM32H7-class registers: USART1 on PB14/PB15 (AF4),
//! DMA1 stream 0 as the circular RX capture (DMAMUX request 41) and
//! stream 1 as the one-shot TX mover (request 42). Byte-sized transfers,
//! FIFO bypassed, low stream priority.
//!
//! The back end carries its register block base addresses, defaulting to
//! the STM32H7 memory map; tests point them at ordinary arrays.
//!
//! # Register Map (USART)
//!
//! | Offset | Name | Description              |
//! |--------|------|--------------------------|
//! | 0x00   | CR1  | Control Register 1       |
//! | 0x04   | CR2  | Control Register 2       |
//! | 0x08   | CR3  | Control Register 3       |
//! | 0x0C   | BRR  | Baud Rate Register       |
//! | 0x1C   | ISR  | Interrupt/Status Register|
//! | 0x20   | ICR  | Interrupt Clear Register |
//! | 0x24   | RDR  | Receive Data Register    |
//! | 0x28   | TDR  | Transmit Data Register   |

use bitflags::bitflags;

use crate::hw::SerialHw;

// ============================================================================
// Peripheral Base Addresses (STM32H7)
// ============================================================================

const USART1_BASE: usize = 0x4001_1000;
const DMA1_BASE: usize = 0x4002_0000;
const DMAMUX1_BASE: usize = 0x4002_0800;
const GPIOB_BASE: usize = 0x5802_0400;
const RCC_BASE: usize = 0x5802_4400;
const NVIC_BASE: usize = 0xE000_E000;

// ============================================================================
// USART Registers
// ============================================================================

const USART_CR1: usize = 0x00;
const USART_CR2: usize = 0x04;
const USART_CR3: usize = 0x08;
const USART_BRR: usize = 0x0C;
const USART_ISR: usize = 0x1C;
const USART_RDR: usize = 0x24;
const USART_TDR: usize = 0x28;

bitflags! {
    /// USART control register 1 bits
    #[derive(Clone, Copy)]
    struct Cr1: u32 {
        const UE = 1 << 0;       // USART Enable
        const RE = 1 << 2;       // Receiver Enable
        const TE = 1 << 3;       // Transmitter Enable
        const PCE = 1 << 10;     // Parity Control Enable
        const M0 = 1 << 12;      // Word Length bit 0
        const OVER8 = 1 << 15;   // 8x Oversampling
        const FIFOEN = 1 << 29;  // FIFO Enable
    }
}

bitflags! {
    /// USART interrupt/status register bits
    #[derive(Clone, Copy)]
    struct Isr: u32 {
        const TEACK = 1 << 21;   // Transmit Enable Acknowledge
        const REACK = 1 << 22;   // Receive Enable Acknowledge
    }
}

bitflags! {
    /// USART control register 3 bits
    #[derive(Clone, Copy)]
    struct Cr3: u32 {
        const DMAR = 1 << 6;     // RX DMA Request Enable
        const DMAT = 1 << 7;     // TX DMA Request Enable
        const RTSE = 1 << 8;     // RTS Enable
        const CTSE = 1 << 9;     // CTS Enable
    }
}

/// Stop-bit field in CR2; zero selects one stop bit
const CR2_STOP_MASK: u32 = 0x3 << 12;

// ============================================================================
// DMA Registers
// ============================================================================

const DMA_LISR: usize = 0x00;  // Low Interrupt Status
const DMA_LIFCR: usize = 0x08; // Low Interrupt Flag Clear

/// RX capture runs on stream 0, TX on stream 1
const RX_STREAM: usize = 0;
const TX_STREAM: usize = 1;

const STREAM_CR: usize = 0x00;   // Stream Configuration
const STREAM_NDTR: usize = 0x04; // Number of Data to Transfer
const STREAM_PAR: usize = 0x08;  // Peripheral Address
const STREAM_M0AR: usize = 0x0C; // Memory 0 Address
const STREAM_FCR: usize = 0x14;  // FIFO Control

bitflags! {
    /// DMA stream configuration bits
    #[derive(Clone, Copy)]
    struct StreamCr: u32 {
        const EN = 1 << 0;        // Stream Enable
        const HTIE = 1 << 3;      // Half Transfer Interrupt Enable
        const TCIE = 1 << 4;      // Transfer Complete Interrupt Enable
        const DIR_M2P = 1 << 6;   // Memory to Peripheral
        const CIRC = 1 << 8;      // Circular Mode
        const PINC = 1 << 9;      // Peripheral Increment
        const MINC = 1 << 10;     // Memory Increment
    }
}

/// Peripheral/memory transfer width fields; zero in both selects bytes
const STREAM_CR_SIZE_MASK: u32 = 0x7800;

/// RX stream: peripheral to memory, circular, byte-wide, memory
/// auto-increment, completion and half-transfer interrupts
const RX_STREAM_CONFIG: StreamCr = StreamCr::CIRC
    .union(StreamCr::MINC)
    .union(StreamCr::HTIE)
    .union(StreamCr::TCIE);

/// TX stream: memory to peripheral, one-shot, byte-wide, memory
/// auto-increment, completion interrupt
const TX_STREAM_CONFIG: StreamCr = StreamCr::DIR_M2P
    .union(StreamCr::MINC)
    .union(StreamCr::TCIE);

bitflags! {
    /// DMA low interrupt status/clear bits for streams 0 and 1
    #[derive(Clone, Copy)]
    struct DmaEvents: u32 {
        const HTIF0 = 1 << 4;   // Stream 0 Half Transfer
        const TCIF0 = 1 << 5;   // Stream 0 Transfer Complete
        const HTIF1 = 1 << 10;  // Stream 1 Half Transfer
        const TCIF1 = 1 << 11;  // Stream 1 Transfer Complete
    }
}

// ============================================================================
// DMAMUX Request Routing
// ============================================================================

/// USART1_RX request line
const DMAMUX_REQ_USART1_RX: u32 = 41;
/// USART1_TX request line
const DMAMUX_REQ_USART1_TX: u32 = 42;

const DMAMUX_REQ_ID_MASK: u32 = 0x7F;

// ============================================================================
// GPIO / RCC / NVIC
// ============================================================================

const GPIO_MODER: usize = 0x00;
const GPIO_OTYPER: usize = 0x04;
const GPIO_OSPEEDR: usize = 0x08;
const GPIO_PUPDR: usize = 0x0C;
const GPIO_AFRH: usize = 0x24;

const RCC_D2CCIP2R: usize = 0x054;
const RCC_AHB1ENR: usize = 0x0D8;
const RCC_AHB4ENR: usize = 0x0E0;
const RCC_APB2ENR: usize = 0x0F0;

const RCC_AHB1ENR_DMA1EN: u32 = 1 << 0;
const RCC_AHB4ENR_GPIOBEN: u32 = 1 << 1;
const RCC_APB2ENR_USART1EN: u32 = 1 << 4;
/// USART1/6 kernel clock selector; zero selects pclk2
const RCC_D2CCIP2R_USART16SEL: u32 = 0x7 << 3;

const NVIC_ISER0: usize = 0x100;
const NVIC_ICER0: usize = 0x180;
const NVIC_IPR_BASE: usize = 0x400;

const RX_STREAM_IRQ: u32 = 11; // DMA1_Stream0
const TX_STREAM_IRQ: u32 = 12; // DMA1_Stream1
const STREAM_IRQ_PRIORITY: u8 = 5;

// ============================================================================
// Register Access
// ============================================================================

#[inline]
fn read32(addr: usize) -> u32 {
    unsafe { core::ptr::read_volatile(addr as *const u32) }
}

#[inline]
fn write32(addr: usize, val: u32) {
    unsafe { core::ptr::write_volatile(addr as *mut u32, val) }
}

#[inline]
fn modify32(addr: usize, clear: u32, set: u32) {
    write32(addr, (read32(addr) & !clear) | set);
}

#[inline]
fn write8(addr: usize, val: u8) {
    unsafe { core::ptr::write_volatile(addr as *mut u8, val) }
}

// ============================================================================
// Back End
// ============================================================================

/// Memory-mapped implementation of [`SerialHw`]
pub struct MmioHw {
    usart: usize,
    dma: usize,
    dmamux: usize,
    gpiob: usize,
    rcc: usize,
    nvic: usize,
}

impl MmioHw {
    /// Create the back end at the STM32H7 memory map
    ///
    /// # Safety
    ///
    /// The caller asserts that this runs on a target where the USART1,
    /// DMA1, DMAMUX1, GPIOB and RCC register blocks live at their
    /// STM32H7 addresses, and that no other code owns them.
    pub const unsafe fn new() -> Self {
        Self::with_bases(
            USART1_BASE,
            DMA1_BASE,
            DMAMUX1_BASE,
            GPIOB_BASE,
            RCC_BASE,
            NVIC_BASE,
        )
    }

    /// Create the back end over explicit register block bases
    ///
    /// # Safety
    ///
    /// Every base the driver will touch must point at writable memory
    /// laid out like the corresponding register block, owned by this
    /// back end alone.
    pub const unsafe fn with_bases(
        usart: usize,
        dma: usize,
        dmamux: usize,
        gpiob: usize,
        rcc: usize,
        nvic: usize,
    ) -> Self {
        Self {
            usart,
            dma,
            dmamux,
            gpiob,
            rcc,
            nvic,
        }
    }

    #[inline]
    fn stream(&self, stream: usize) -> usize {
        self.dma + 0x10 + 0x18 * stream
    }
}

impl SerialHw for MmioHw {
    fn configure_pins(&self) {
        // Kernel clock for USART1 from pclk2, then the clock gates.
        modify32(self.rcc + RCC_D2CCIP2R, RCC_D2CCIP2R_USART16SEL, 0);
        modify32(self.rcc + RCC_APB2ENR, 0, RCC_APB2ENR_USART1EN);
        modify32(self.rcc + RCC_AHB4ENR, 0, RCC_AHB4ENR_GPIOBEN);
        modify32(self.rcc + RCC_AHB1ENR, 0, RCC_AHB1ENR_DMA1EN);

        // PB14 (TX) / PB15 (RX) to AF4, push-pull, low speed, no pull.
        modify32(self.gpiob + GPIO_MODER, (3 << 28) | (3 << 30), (2 << 28) | (2 << 30));
        modify32(self.gpiob + GPIO_AFRH, (0xF << 24) | (0xF << 28), (4 << 24) | (4 << 28));
        modify32(self.gpiob + GPIO_OTYPER, (1 << 14) | (1 << 15), 0);
        modify32(self.gpiob + GPIO_OSPEEDR, (3 << 28) | (3 << 30), 0);
        modify32(self.gpiob + GPIO_PUPDR, (3 << 28) | (3 << 30), 0);
    }

    fn set_divisor(&self, divisor: u32) {
        // BRR writes require the peripheral disabled; a running
        // peripheral comes back up afterwards.
        let cr1 = read32(self.usart + USART_CR1);
        modify32(self.usart + USART_CR1, Cr1::UE.bits(), 0);
        write32(self.usart + USART_BRR, divisor);
        if cr1 & Cr1::UE.bits() != 0 {
            modify32(self.usart + USART_CR1, 0, Cr1::UE.bits());
        }
    }

    fn enable_uart(&self) {
        modify32(self.usart + USART_CR1, Cr1::UE.bits(), 0);

        // 8 data bits, no parity, 16x oversampling, FIFO off.
        modify32(
            self.usart + USART_CR1,
            (Cr1::M0.bits()) | Cr1::PCE.bits() | Cr1::OVER8.bits() | Cr1::FIFOEN.bits(),
            Cr1::TE.bits() | Cr1::RE.bits(),
        );
        // One stop bit, no hardware flow control.
        modify32(self.usart + USART_CR2, CR2_STOP_MASK, 0);
        modify32(self.usart + USART_CR3, Cr3::RTSE.bits() | Cr3::CTSE.bits(), 0);

        modify32(self.usart + USART_CR1, 0, Cr1::UE.bits());

        let ack = Isr::TEACK.bits() | Isr::REACK.bits();
        while read32(self.usart + USART_ISR) & ack != ack {
            core::hint::spin_loop();
        }
    }

    fn disable_uart(&self) {
        modify32(self.usart + USART_CR1, Cr1::UE.bits(), 0);
    }

    fn set_tx_request(&self, on: bool) {
        if on {
            modify32(self.usart + USART_CR3, 0, Cr3::DMAT.bits());
        } else {
            modify32(self.usart + USART_CR3, Cr3::DMAT.bits(), 0);
        }
    }

    fn set_rx_request(&self, on: bool) {
        if on {
            modify32(self.usart + USART_CR3, 0, Cr3::DMAR.bits());
        } else {
            modify32(self.usart + USART_CR3, Cr3::DMAR.bits(), 0);
        }
    }

    fn tx_stream_stop(&self) {
        let cr = self.stream(TX_STREAM) + STREAM_CR;
        modify32(cr, StreamCr::EN.bits(), 0);
        while read32(cr) & StreamCr::EN.bits() != 0 {
            core::hint::spin_loop();
        }
    }

    unsafe fn tx_stream_start(&self, src: *const u8, len: u32) {
        let base = self.stream(TX_STREAM);
        modify32(
            self.dmamux + 4 * TX_STREAM,
            DMAMUX_REQ_ID_MASK,
            DMAMUX_REQ_USART1_TX,
        );
        write32(base + STREAM_PAR, (self.usart + USART_TDR) as u32);
        write32(base + STREAM_M0AR, src as usize as u32);
        write32(base + STREAM_NDTR, len);
        write32(base + STREAM_FCR, 0); // direct mode
        write32(base + STREAM_CR, TX_STREAM_CONFIG.bits());
        modify32(base + STREAM_CR, 0, StreamCr::EN.bits());
    }

    fn tx_complete(&self) -> bool {
        read32(self.dma + DMA_LISR) & DmaEvents::TCIF1.bits() != 0
    }

    fn tx_ack_complete(&self) {
        write32(self.dma + DMA_LIFCR, DmaEvents::TCIF1.bits());
    }

    fn rx_stream_stop(&self) {
        let cr = self.stream(RX_STREAM) + STREAM_CR;
        modify32(cr, StreamCr::EN.bits(), 0);
        while read32(cr) & StreamCr::EN.bits() != 0 {
            core::hint::spin_loop();
        }
    }

    unsafe fn rx_stream_start(&self, dst: *mut u8, len: u32) {
        let base = self.stream(RX_STREAM);
        modify32(
            self.dmamux + 4 * RX_STREAM,
            DMAMUX_REQ_ID_MASK,
            DMAMUX_REQ_USART1_RX,
        );
        write32(base + STREAM_PAR, (self.usart + USART_RDR) as u32);
        write32(base + STREAM_M0AR, dst as usize as u32);
        write32(base + STREAM_NDTR, len);
        write32(base + STREAM_FCR, 0); // direct mode
        write32(base + STREAM_CR, RX_STREAM_CONFIG.bits());
        modify32(base + STREAM_CR, 0, StreamCr::EN.bits());
    }

    fn rx_remaining(&self) -> u32 {
        read32(self.stream(RX_STREAM) + STREAM_NDTR)
    }

    fn rx_ack_events(&self) {
        write32(
            self.dma + DMA_LIFCR,
            DmaEvents::HTIF0.bits() | DmaEvents::TCIF0.bits(),
        );
    }

    fn enable_irqs(&self) {
        let ipr = self.nvic + NVIC_IPR_BASE;
        write8(ipr + RX_STREAM_IRQ as usize, STREAM_IRQ_PRIORITY << 4);
        write8(ipr + TX_STREAM_IRQ as usize, STREAM_IRQ_PRIORITY << 4);
        write32(self.nvic + NVIC_ISER0, (1 << RX_STREAM_IRQ) | (1 << TX_STREAM_IRQ));
    }

    fn disable_irqs(&self) {
        write32(self.nvic + NVIC_ICER0, (1 << RX_STREAM_IRQ) | (1 << TX_STREAM_IRQ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Back end over a fake USART register block in ordinary memory.
    fn usart_hw(regs: &mut [u32; 16]) -> MmioHw {
        unsafe { MmioHw::with_bases(regs.as_mut_ptr() as usize, 0, 0, 0, 0, 0) }
    }

    #[test]
    fn test_rx_stream_config_word() {
        let cfg = RX_STREAM_CONFIG;
        // Peripheral to memory, circular, both progress interrupts.
        assert!(cfg.contains(StreamCr::CIRC));
        assert!(cfg.contains(StreamCr::MINC));
        assert!(cfg.contains(StreamCr::HTIE));
        assert!(cfg.contains(StreamCr::TCIE));
        assert!(!cfg.contains(StreamCr::DIR_M2P));
        // Never armed as part of the config word.
        assert!(!cfg.contains(StreamCr::EN));
        // Byte-wide on both sides.
        assert_eq!(cfg.bits() & STREAM_CR_SIZE_MASK, 0);
    }

    #[test]
    fn test_tx_stream_config_word() {
        let cfg = TX_STREAM_CONFIG;
        assert!(cfg.contains(StreamCr::DIR_M2P));
        assert!(cfg.contains(StreamCr::MINC));
        assert!(cfg.contains(StreamCr::TCIE));
        // One-shot, no peripheral increment.
        assert!(!cfg.contains(StreamCr::CIRC));
        assert!(!cfg.contains(StreamCr::PINC));
        assert!(!cfg.contains(StreamCr::EN));
        assert_eq!(cfg.bits() & STREAM_CR_SIZE_MASK, 0);
    }

    #[test]
    fn test_request_routing() {
        assert_ne!(DMAMUX_REQ_USART1_RX, DMAMUX_REQ_USART1_TX);
        assert_eq!(DMAMUX_REQ_USART1_RX & !DMAMUX_REQ_ID_MASK, 0);
        assert_eq!(DMAMUX_REQ_USART1_TX & !DMAMUX_REQ_ID_MASK, 0);
    }

    #[test]
    fn test_set_divisor_preserves_uart_enable() {
        let mut regs = [0u32; 16];
        let hw = usart_hw(&mut regs);

        // Running peripheral: a rate change must not leave it disabled.
        regs[USART_CR1 / 4] = Cr1::UE.bits() | Cr1::TE.bits() | Cr1::RE.bits();
        hw.set_divisor(1042);
        assert_eq!(regs[USART_BRR / 4], 1042);
        assert_ne!(regs[USART_CR1 / 4] & Cr1::UE.bits(), 0);
        assert_ne!(regs[USART_CR1 / 4] & Cr1::TE.bits(), 0);

        // Disabled peripheral stays disabled.
        regs[USART_CR1 / 4] = 0;
        hw.set_divisor(651);
        assert_eq!(regs[USART_BRR / 4], 651);
        assert_eq!(regs[USART_CR1 / 4] & Cr1::UE.bits(), 0);
    }

    #[test]
    fn test_enable_uart_programs_frame() {
        let mut regs = [0u32; 16];
        // Acknowledgments already raised so the enable spin returns.
        regs[USART_ISR / 4] = Isr::TEACK.bits() | Isr::REACK.bits();
        let hw = usart_hw(&mut regs);

        hw.enable_uart();
        let cr1 = regs[USART_CR1 / 4];
        assert_ne!(cr1 & Cr1::UE.bits(), 0);
        assert_ne!(cr1 & Cr1::TE.bits(), 0);
        assert_ne!(cr1 & Cr1::RE.bits(), 0);
        // 8N1, FIFO off.
        assert_eq!(cr1 & (Cr1::M0.bits() | Cr1::PCE.bits() | Cr1::FIFOEN.bits()), 0);
        assert_eq!(regs[USART_CR2 / 4] & CR2_STOP_MASK, 0);
    }

    #[test]
    fn test_stream_arming() {
        let mut dma = [0u32; 32];
        let mut dmamux = [0u32; 2];
        let hw = unsafe {
            MmioHw::with_bases(
                0,
                dma.as_mut_ptr() as usize,
                dmamux.as_mut_ptr() as usize,
                0,
                0,
                0,
            )
        };

        let ring = [0u8; 4];
        unsafe { hw.rx_stream_start(ring.as_ptr() as *mut u8, 4) };
        let s0 = (0x10 + 0x18 * RX_STREAM) / 4;
        assert_eq!(dma[s0 + STREAM_NDTR / 4], 4);
        assert_eq!(dmamux[RX_STREAM] & DMAMUX_REQ_ID_MASK, DMAMUX_REQ_USART1_RX);
        let cr = dma[s0 + STREAM_CR / 4];
        assert_eq!(cr & !StreamCr::EN.bits(), RX_STREAM_CONFIG.bits());
        assert_ne!(cr & StreamCr::EN.bits(), 0);

        let msg = [0u8; 3];
        unsafe { hw.tx_stream_start(msg.as_ptr(), 3) };
        let s1 = (0x10 + 0x18 * TX_STREAM) / 4;
        assert_eq!(dma[s1 + STREAM_NDTR / 4], 3);
        assert_eq!(dmamux[TX_STREAM] & DMAMUX_REQ_ID_MASK, DMAMUX_REQ_USART1_TX);
        let cr = dma[s1 + STREAM_CR / 4];
        assert_eq!(cr & !StreamCr::EN.bits(), TX_STREAM_CONFIG.bits());
        assert_ne!(cr & StreamCr::EN.bits(), 0);
    }
}
