//! Standard fixture populations.
//!
//! - [`counter_module`]: `counter` objects that tick at a fixed
//!   interval until a limit.
//! - [`tracer_module`]: `tracer` objects recording every pass into a
//!   [`TraceLog`].
//! - [`feeder_module`]: `house` objects feeding integer load into a
//!   parent `feeder`, for comparing serial and parallel runs.
//! - [`faults_module`]: classes that misbehave in one specific way each.
//! - [`deferred_module`]: classes exercising deferred initialization.
//! - [`lifecycle_module`]: a class recording its non-sync callbacks.
//! - [`sleeper_module`]: a class whose sync blocks for a while.

use std::time::Duration;

use gridsync_core::{CallbackError, NextEvent, PassConfig, Timestamp};
use gridsync_model::{Callback, InitStatus, PropertyDescriptor, PropertyType, PropertyValue};

use crate::{EventLog, FixtureClass, FixtureModule, TraceEntry, TraceLog};

fn int64(name: &str, offset: usize) -> PropertyDescriptor {
    PropertyDescriptor::new(name, PropertyType::Int64, offset)
}

/// `counter`: BOTTOMUP only. Each sync increments `count` and asks
/// for `t1 + interval` while that is before `limit`, then never.
pub fn counter_module(interval: i64, limit: i64) -> FixtureModule {
    let count = int64("count", 0);
    let step = int64("interval", 8).default_value(PropertyValue::Int64(interval));
    let until = PropertyDescriptor::new("limit", PropertyType::Timestamp, 16)
        .default_value(PropertyValue::Timestamp(Timestamp(limit)));
    let (c, s, u) = (count.clone(), step.clone(), until.clone());
    FixtureModule::new("counters").class(
        FixtureClass::new("counter", 24, PassConfig::BOTTOMUP)
            .property(count)
            .property(step)
            .property(until)
            .callback(Callback::sync(move |body, _, t1, _| {
                let n = body.payload.get_i64(&c)?;
                body.payload.set_i64(&c, n + 1)?;
                let next = Timestamp(t1.0 + body.payload.get_i64(&s)?);
                if next < body.payload.get_timestamp(&u)? {
                    Ok(NextEvent::hard(next))
                } else {
                    Ok(NextEvent::Never)
                }
            })),
    )
}

/// `tracer`: all three passes, records each call and reports never.
pub fn tracer_module(log: TraceLog) -> FixtureModule {
    FixtureModule::new("tracers").class(
        FixtureClass::new(
            "tracer",
            0,
            PassConfig::PRETOPDOWN | PassConfig::BOTTOMUP | PassConfig::POSTTOPDOWN,
        )
        .callback(Callback::sync(move |body, _, t1, pass| {
            log.push(TraceEntry {
                pass,
                object: body.id(),
                rank: body.header.rank,
                t1,
            });
            Ok(NextEvent::Never)
        })),
    )
}

/// Period of the feeder population, in seconds.
pub const FEEDER_PERIOD: i64 = 60;
/// Last time the feeder population asks to be woken.
pub const FEEDER_HORIZON: i64 = 600;

/// `feeder` (PRETOPDOWN, BOTTOMUP) and `house` (BOTTOMUP).
///
/// On PRETOPDOWN a feeder clears `total`. On BOTTOMUP each house
/// derives an integer `load` from its seed and the time, accumulates
/// `energy`, and adds the load to its parent feeder's `total`; the
/// feeder, ranked above its houses, then folds `total` into `peak`
/// and `sum`. Houses tick every [`FEEDER_PERIOD`] seconds until
/// [`FEEDER_HORIZON`].
pub fn feeder_module() -> FixtureModule {
    let total = int64("total", 0);
    let peak = int64("peak", 8);
    let sum = int64("sum", 16);
    let load = int64("load", 0);
    let energy = int64("energy", 8);

    let reset = total.clone();
    let (t, p, s) = (total.clone(), peak.clone(), sum.clone());
    let feeder = FixtureClass::new("feeder", 24, PassConfig::PRETOPDOWN | PassConfig::BOTTOMUP)
        .property(total.clone())
        .property(peak)
        .property(sum)
        .callback(Callback::sync(move |body, _, _, pass| {
            if pass == gridsync_core::Pass::PreTopDown {
                body.payload.set_i64(&reset, 0)?;
            } else {
                let now = body.payload.get_i64(&t)?;
                let best = body.payload.get_i64(&p)?.max(now);
                body.payload.set_i64(&p, best)?;
                let acc = body.payload.get_i64(&s)?;
                body.payload.set_i64(&s, acc + now)?;
            }
            Ok(NextEvent::Never)
        }));

    let (l, e) = (load.clone(), energy.clone());
    let house = FixtureClass::new("house", 16, PassConfig::BOTTOMUP)
        .property(load)
        .property(energy)
        .callback(Callback::sync(move |body, ctx, t1, _| {
            let demand = (body.header.rng_seed % 50) as i64 + t1.0 / FEEDER_PERIOD;
            body.payload.set_i64(&l, demand)?;
            let acc = body.payload.get_i64(&e)?;
            body.payload.set_i64(&e, acc + demand)?;
            if let Some(parent) = body.header.parent {
                ctx.write(parent, |feeder| {
                    let now = feeder.payload.get_i64(&total)?;
                    feeder.payload.set_i64(&total, now + demand)
                })??;
            }
            if t1.0 < FEEDER_HORIZON {
                Ok(NextEvent::hard(Timestamp(t1.0 + FEEDER_PERIOD)))
            } else {
                Ok(NextEvent::Never)
            }
        }));

    FixtureModule::new("feeders").class(feeder).class(house)
}

/// One class per failure mode, all BOTTOMUP:
///
/// - `stubborn`: soft request at `t1` every time.
/// - `regressor`: soft request one second before `t1` every time.
/// - `faulty`: sync returns an error.
/// - `clockstopper`: hard request five seconds before `t1`.
/// - `hollow`: declares BOTTOMUP but has no sync callback.
pub fn faults_module() -> FixtureModule {
    FixtureModule::new("faults")
        .class(
            FixtureClass::new("stubborn", 0, PassConfig::BOTTOMUP)
                .callback(Callback::sync(|_, _, t1, _| Ok(NextEvent::soft(t1)))),
        )
        .class(
            FixtureClass::new("regressor", 0, PassConfig::BOTTOMUP).callback(Callback::sync(
                |_, _, t1, _| Ok(NextEvent::soft(Timestamp(t1.0 - 1))),
            )),
        )
        .class(
            FixtureClass::new("faulty", 0, PassConfig::BOTTOMUP).callback(Callback::sync(
                |_, _, _, _| Err(CallbackError::failed("breaker tripped")),
            )),
        )
        .class(
            FixtureClass::new("clockstopper", 0, PassConfig::BOTTOMUP).callback(Callback::sync(
                |_, _, t1, _| Ok(NextEvent::hard(Timestamp(t1.0 - 5))),
            )),
        )
        .class(FixtureClass::new("hollow", 0, PassConfig::BOTTOMUP))
}

/// `waiter` defers its first init and succeeds on the second; `stuck`
/// defers forever. Neither participates in any pass.
pub fn deferred_module() -> FixtureModule {
    let attempts = int64("attempts", 0);
    let a = attempts.clone();
    FixtureModule::new("deferred")
        .class(
            FixtureClass::new("waiter", 8, PassConfig::NOSYNC)
                .property(attempts)
                .callback(Callback::init(move |body, _| {
                    let n = body.payload.get_i64(&a)? + 1;
                    body.payload.set_i64(&a, n)?;
                    Ok(if n < 2 {
                        InitStatus::Deferred
                    } else {
                        InitStatus::Done
                    })
                })),
        )
        .class(
            FixtureClass::new("stuck", 0, PassConfig::NOSYNC)
                .callback(Callback::init(|_, _| Ok(InitStatus::Deferred))),
        )
}

/// `recorder`: BOTTOMUP, ticks every 10 s until 20, and logs every
/// precommit, commit, heartbeat, update and finalize call.
pub fn lifecycle_module(log: EventLog) -> FixtureModule {
    let (l1, l2, l3, l4, l5) = (log.clone(), log.clone(), log.clone(), log.clone(), log);
    FixtureModule::new("lifecycle").class(
        FixtureClass::new("recorder", 0, PassConfig::BOTTOMUP)
            .callback(Callback::sync(|_, _, t1, _| {
                Ok(if t1.0 < 20 {
                    NextEvent::hard(Timestamp(t1.0 + 10))
                } else {
                    NextEvent::Never
                })
            }))
            .callback(Callback::precommit(move |_, _, t| {
                l1.push(format!("precommit@{t}"));
                Ok(())
            }))
            .callback(Callback::commit(move |_, _, t1, t2| {
                l2.push(format!("commit@{t1}->{t2}"));
                Ok(NextEvent::Never)
            }))
            .callback(Callback::heartbeat(move |_, ctx| {
                l3.push(format!("heartbeat@{}", ctx.clock()));
                Ok(NextEvent::Never)
            }))
            .callback(Callback::update(move |_, _, t, dt| {
                l4.push(format!("update@{t}+{dt}"));
                Ok(())
            }))
            .callback(Callback::finalize(move |_, _| {
                l5.push("finalize");
                Ok(())
            })),
    )
}

/// `sleeper`: BOTTOMUP, blocks for `delay` in every sync.
pub fn sleeper_module(delay: Duration) -> FixtureModule {
    FixtureModule::new("sleepers").class(
        FixtureClass::new("sleeper", 0, PassConfig::BOTTOMUP).callback(Callback::sync(
            move |_, _, _, _| {
                std::thread::sleep(delay);
                Ok(NextEvent::Never)
            },
        )),
    )
}
