//! Iambic keyer behaviour over whole paddle sequences.

use cw_keyer_core::config::{IambicConfig, IambicMode, MemoryMode, SqueezeMode};
use cw_keyer_core::iambic::{Element, IambicProcessor, KeyerState, Transition};
use cw_keyer_core::sample::GpioState;

const DIT: GpioState = GpioState::from_paddles(true, false);
const DAH: GpioState = GpioState::from_paddles(false, true);

fn config(wpm: u16) -> IambicConfig {
    IambicConfig {
        wpm,
        tick_rate_hz: 1_000,
        ..Default::default()
    }
}

/// Run `ticks` ticks, paddles given by tick index, and record transitions
/// with the tick they happened on.
fn run<F: FnMut(u32) -> GpioState>(
    keyer: &mut IambicProcessor,
    ticks: u32,
    mut paddles: F,
) -> Vec<(u32, Transition)> {
    (0..ticks)
        .filter_map(|t| keyer.tick(paddles(t)).transition.map(|tr| (t, tr)))
        .collect()
}

fn key_ons(transitions: &[(u32, Transition)]) -> Vec<Element> {
    transitions
        .iter()
        .filter(|(_, tr)| tr.is_key_down())
        .map(|(_, tr)| tr.element())
        .collect()
}

#[test]
fn test_dah_is_three_dits_at_every_speed() {
    for wpm in 5..=100 {
        let mut keyer = IambicProcessor::new(config(wpm));
        let timing = *keyer.timing();
        assert!(
            timing.dah_ticks.abs_diff(3 * timing.dit_ticks) <= 1,
            "wpm {}: dit {} dah {}",
            wpm,
            timing.dit_ticks,
            timing.dah_ticks
        );

        // Measured on the output, not just the cache
        let dah = run(&mut keyer, timing.dah_ticks + 1, |_| DAH);
        assert_eq!(dah[0], (0, Transition::KeyOn(Element::Dah)));
        assert_eq!(dah[1], (timing.dah_ticks, Transition::KeyOff(Element::Dah)));

        keyer.reset();
        let dit = run(&mut keyer, timing.dit_ticks + 1, |_| DIT);
        assert_eq!(dit[1], (timing.dit_ticks, Transition::KeyOff(Element::Dit)));
    }
}

#[test]
fn test_mode_a_release_stops_after_current_element() {
    let modes = [
        MemoryMode::None,
        MemoryMode::DotOnly,
        MemoryMode::DahOnly,
        MemoryMode::DotAndDah,
    ];

    for memory_mode in modes {
        for release in [1, 17, 45, 59, 60, 61, 90, 119, 150, 200, 239] {
            let mut keyer = IambicProcessor::new(IambicConfig {
                iambic_mode: IambicMode::ModeA,
                memory_mode,
                ..config(20)
            });

            let transitions = run(&mut keyer, 2_000, |t| {
                if t < release {
                    GpioState::BOTH
                } else {
                    GpioState::IDLE
                }
            });

            let late_starts: Vec<_> = transitions
                .iter()
                .filter(|(t, tr)| *t >= release && tr.is_key_down())
                .collect();
            assert!(
                late_starts.is_empty(),
                "{:?} release at {}: {:?}",
                memory_mode,
                release,
                late_starts
            );
            assert_eq!(keyer.state(), KeyerState::Idle);
        }
    }
}

#[test]
fn test_mode_a_returns_idle_right_after_trailing_space() {
    let mut keyer = IambicProcessor::new(IambicConfig {
        iambic_mode: IambicMode::ModeA,
        ..config(20)
    });
    let dit = keyer.timing().dit_ticks;

    // Squeeze released halfway through the first dit's mark
    let transitions = run(&mut keyer, dit / 2, |_| GpioState::BOTH);
    assert_eq!(transitions, vec![(0, Transition::KeyOn(Element::Dit))]);

    // Rest of the mark, then the whole space
    let rest = run(&mut keyer, dit / 2 + dit + 1, |_| GpioState::IDLE);
    assert_eq!(rest.len(), 1);
    assert!(!rest[0].1.is_key_down());
    assert_eq!(keyer.state(), KeyerState::Idle);
}

#[test]
fn test_mode_b_latch_on_alternates_while_squeezed() {
    for memory_mode in [MemoryMode::DotAndDah, MemoryMode::None] {
        let mut keyer = IambicProcessor::new(IambicConfig {
            iambic_mode: IambicMode::ModeB,
            squeeze_mode: SqueezeMode::LatchOn,
            memory_mode,
            ..config(20)
        });

        let ons = key_ons(&run(&mut keyer, 10_000, |_| GpioState::BOTH));
        assert!(ons.len() > 30, "{:?}", memory_mode);
        for (i, element) in ons.iter().enumerate() {
            let expected = if i % 2 == 0 { Element::Dit } else { Element::Dah };
            assert_eq!(*element, expected, "{:?} element {}", memory_mode, i);
        }
    }
}

#[test]
fn test_single_dit_at_25_wpm() {
    let mut keyer = IambicProcessor::new(IambicConfig {
        tick_rate_hz: 10_000,
        ..IambicConfig::with_wpm(25)
    });
    let timing = *keyer.timing();
    assert_eq!(timing.dit_duration_us(), 48_000);

    let dit = timing.dit_ticks;
    let transitions = run(&mut keyer, dit * 10, |t| if t < dit { DIT } else { GpioState::IDLE });

    assert_eq!(
        transitions,
        vec![
            (0, Transition::KeyOn(Element::Dit)),
            (dit, Transition::KeyOff(Element::Dit)),
        ]
    );
    assert_eq!(i64::from(dit) * timing.tick_period_us(), timing.dit_duration_us());
    assert_eq!(keyer.state(), KeyerState::Idle);
}

#[test]
fn test_trailing_space_then_idle_on_exact_tick() {
    let mut keyer = IambicProcessor::new(config(20));
    let dit = keyer.timing().dit_ticks;

    run(&mut keyer, dit + 1, |t| if t == 0 { DIT } else { GpioState::IDLE });
    assert_eq!(
        keyer.state(),
        KeyerState::Sending {
            element: Element::Dit,
            phase: cw_keyer_core::iambic::Phase::Space
        }
    );

    run(&mut keyer, dit - 1, |_| GpioState::IDLE);
    assert!(matches!(keyer.state(), KeyerState::Sending { .. }));

    keyer.tick(GpioState::IDLE);
    assert_eq!(keyer.state(), KeyerState::Idle);
}

/// Squeeze from t=0, release in the middle of the gap after the 4th
/// element: Mode B sends exactly one more, alternating.
#[test]
fn test_mode_b_squeeze_release_mid_gap_sends_one_more() {
    let mut keyer = IambicProcessor::new(IambicConfig {
        iambic_mode: IambicMode::ModeB,
        memory_mode: MemoryMode::DotAndDah,
        squeeze_mode: SqueezeMode::LatchOn,
        ..config(20)
    });
    let dit = keyer.timing().dit_ticks;

    let mut ons = Vec::new();
    let mut key_offs = 0;
    while key_offs < 4 {
        match keyer.tick(GpioState::BOTH).transition {
            Some(Transition::KeyOn(element)) => ons.push(element),
            Some(Transition::KeyOff(_)) => key_offs += 1,
            None => {}
        }
    }
    assert_eq!(ons, vec![Element::Dit, Element::Dah, Element::Dit, Element::Dah]);

    run(&mut keyer, dit / 2, |_| GpioState::BOTH);
    let after = run(&mut keyer, 5_000, |_| GpioState::IDLE);

    assert_eq!(key_ons(&after), vec![Element::Dit]);
    assert_eq!(keyer.state(), KeyerState::Idle);
}

#[test]
fn test_mode_a_squeeze_release_mid_gap_sends_nothing_more() {
    let mut keyer = IambicProcessor::new(IambicConfig {
        iambic_mode: IambicMode::ModeA,
        squeeze_mode: SqueezeMode::LatchOn,
        ..config(20)
    });
    let dit = keyer.timing().dit_ticks;

    // First dit (mark + half the space)
    run(&mut keyer, dit + dit / 2, |_| GpioState::BOTH);
    assert!(keyer.memory().is_some());

    let after = run(&mut keyer, 5_000, |_| GpioState::IDLE);
    assert!(key_ons(&after).is_empty());
    assert_eq!(keyer.memory(), None);
}

#[test]
fn test_memory_mode_dot_only() {
    // Dah held, dit tapped during the mark, everything released before the
    // space ends
    let tap = |t: u32| match t {
        0..=9 => DAH,
        10..=19 => GpioState::BOTH,
        _ => GpioState::IDLE,
    };

    let mut dot_only = IambicProcessor::new(IambicConfig {
        memory_mode: MemoryMode::DotOnly,
        ..config(20)
    });
    assert_eq!(key_ons(&run(&mut dot_only, 1_000, tap)), vec![Element::Dah, Element::Dit]);

    let mut dah_only = IambicProcessor::new(IambicConfig {
        memory_mode: MemoryMode::DahOnly,
        ..config(20)
    });
    assert_eq!(key_ons(&run(&mut dah_only, 1_000, tap)), vec![Element::Dah]);
}

#[test]
fn test_latch_off_repeats_without_in_window_squeeze() {
    // Window covers only the first 40% of each phase. The dah paddle closes
    // late in the dit's space, so it is held at space end but was never
    // seen inside the window.
    let paddles = |t: u32| if t < 110 { DIT } else { GpioState::BOTH };
    let window = |squeeze_mode| IambicConfig {
        squeeze_mode,
        mem_window_start_pct: 0,
        mem_window_end_pct: 40,
        ..config(20)
    };

    let mut latch_off = IambicProcessor::new(window(SqueezeMode::LatchOff));
    let ons = key_ons(&run(&mut latch_off, 121, paddles));
    assert_eq!(ons, vec![Element::Dit, Element::Dit]);

    let mut latch_on = IambicProcessor::new(window(SqueezeMode::LatchOn));
    let ons = key_ons(&run(&mut latch_on, 121, paddles));
    assert_eq!(ons, vec![Element::Dit, Element::Dah]);
}

#[test]
fn test_next_element_starts_on_space_completion_tick() {
    let mut keyer = IambicProcessor::new(config(20));
    let timing = *keyer.timing();

    let transitions = run(&mut keyer, 400, |_| DAH);
    let second_on = transitions
        .iter()
        .filter(|(_, tr)| tr.is_key_down())
        .nth(1)
        .map(|(t, _)| *t);
    assert_eq!(second_on, Some(timing.dah_ticks + timing.space_ticks));
}

/// Squeeze held throughout under LATCH_OFF; returns the started elements
/// and how many times memory was armed.
fn latch_off_squeeze(cfg: IambicConfig, ticks: u32) -> (Vec<Element>, usize) {
    let mut keyer = IambicProcessor::new(IambicConfig {
        squeeze_mode: SqueezeMode::LatchOff,
        ..cfg
    });
    let mut ons = Vec::new();
    let mut armed = 0;
    for _ in 0..ticks {
        let out = keyer.tick(GpioState::BOTH);
        if let Some(Transition::KeyOn(element)) = out.transition {
            ons.push(element);
        }
        if out.event.is_some() {
            armed += 1;
        }
    }
    (ons, armed)
}

fn assert_alternates(ons: &[Element]) {
    assert!(ons.len() > 4, "{:?}", ons);
    for pair in ons.windows(2) {
        assert_eq!(pair[1], pair[0].opposite(), "{:?}", ons);
    }
}

#[test]
fn test_window_end_includes_element_completion() {
    let window = IambicConfig {
        mem_window_start_pct: 100,
        mem_window_end_pct: 100,
        ..config(20)
    };

    let (ons, armed) = latch_off_squeeze(window, 2_000);
    assert_alternates(&ons);
    assert!(armed > 0);

    // Squeeze qualification does not depend on memory being enabled
    let (ons, armed) = latch_off_squeeze(
        IambicConfig {
            memory_mode: MemoryMode::None,
            ..window
        },
        2_000,
    );
    assert_alternates(&ons);
    assert_eq!(armed, 0);
}

#[test]
fn test_narrow_late_window_at_top_speed() {
    let cfg = IambicConfig {
        mem_window_start_pct: 95,
        mem_window_end_pct: 100,
        ..config(100)
    };
    assert_eq!(IambicProcessor::new(cfg).timing().dit_ticks, 12);

    let (ons, armed) = latch_off_squeeze(cfg, 500);
    assert_alternates(&ons);
    assert!(armed > 0);
}

#[test]
fn test_window_start_includes_key_on_tick() {
    // A squeeze from idle is in the window at 0%
    let mut keyer = IambicProcessor::new(IambicConfig {
        mem_window_start_pct: 0,
        mem_window_end_pct: 0,
        ..config(20)
    });
    let out = keyer.tick(GpioState::BOTH);
    assert_eq!(out.transition, Some(Transition::KeyOn(Element::Dit)));
    assert_eq!(keyer.memory(), Some(Element::Dah));

    // Window closed from the next tick on; release is ignored, memory kept
    run(&mut keyer, 10, |_| DIT);
    assert_eq!(keyer.memory(), Some(Element::Dah));
}
