//! Generic wait cases: `delay` and `wait`.

use std::sync::Arc;

use crate::arch::interrupts::Nvic;
use crate::kernel::status::OsStatus;
use crate::rv_assert;
use crate::sync::channel::StatusCell;
use crate::testing::TestContext;

use super::{TEST_IRQ, TEST_IRQ_LINES};

const ISR_DELAY: u32 = 0;
const ISR_WAIT: u32 = 1;

/// `delay(10)` and `wait(10)` complete with `EventTimeout`.
pub fn tc_gen_wait_basic(ctx: &TestContext) {
    let c = &ctx.checker;
    ctx.with_kernel(|kernel| {
        rv_assert!(c, kernel.delay(10) == OsStatus::EventTimeout);
        rv_assert!(c, kernel.wait(10).status == OsStatus::EventTimeout);
    });
}

/// Both generic waits are refused in interrupt context.
pub fn tc_gen_wait_interrupts(ctx: &TestContext) {
    let c = &ctx.checker;
    ctx.with_kernel(|kernel| {
        let stat = Arc::new(StatusCell::new());
        let nvic = Nvic::new(kernel, TEST_IRQ_LINES);

        let isr_kernel = kernel.clone();
        let isr_stat = Arc::clone(&stat);
        nvic.install(TEST_IRQ, move |selector: u32| match selector {
            ISR_DELAY => isr_stat.store(isr_kernel.delay(10)),
            ISR_WAIT => isr_stat.store(isr_kernel.wait(10).status),
            _ => {}
        });
        nvic.enable(TEST_IRQ);

        for selector in [ISR_DELAY, ISR_WAIT] {
            nvic.set_selector(TEST_IRQ, selector);
            stat.store(OsStatus::Ok);
            nvic.set_pending(TEST_IRQ);
            rv_assert!(
                c,
                stat.load() == Some(OsStatus::ErrorIsr),
                "selector {}",
                selector
            );
        }

        nvic.disable(TEST_IRQ);
    });
}
