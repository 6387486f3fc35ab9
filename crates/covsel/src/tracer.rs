/*
 *        Copyright (c) 2023 Dinu Blanovschi
 *
 *    Licensed under the Apache License, Version 2.0 (the "License");
 *    you may not use this file except in compliance with the License.
 *    You may obtain a copy of the License at
 *
 *        https://www.apache.org/licenses/LICENSE-2.0
 *
 *    Unless required by applicable law or agreed to in writing, software
 *    distributed under the License is distributed on an "AS IS" BASIS,
 *    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *    See the License for the specific language governing permissions and
 *    limitations under the License.
 */

//! A pluggable line tracer: a small `{idle, tracing}` automaton that turns
//! a raw `on_call`/`on_line`/`on_return` event feed (driven by whatever
//! instrumentation the host runtime provides) into a `file -> {line ->
//! min(depth)}` accumulation.
//!
//! The call stack is tracked as a plain counter of pushed frames; an
//! exception that unwinds several frames at once is handled by
//! [`Tracer::on_unwind_to`], which just truncates the stack rather than
//! requiring one `on_return` per popped frame.

use std::collections::HashMap;

use crate::error::{CovselError, CovselResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Idle,
    Tracing,
}

#[derive(Default)]
pub struct Tracer {
    state_stack_len: usize,
    state: Option<State>,
    lines: HashMap<String, HashMap<u32, u32>>,
}

impl Tracer {
    pub fn new() -> Self {
        Tracer {
            state_stack_len: 0,
            state: None,
            lines: HashMap::new(),
        }
    }

    fn state(&self) -> State {
        self.state.unwrap_or(State::Idle)
    }

    pub fn is_tracing(&self) -> bool {
        self.state() == State::Tracing
    }

    /// idle -> tracing; clears buffers.
    pub fn start(&mut self) {
        self.state = Some(State::Tracing);
        self.state_stack_len = 0;
        self.lines.clear();
    }

    /// tracing -> idle; returns the accumulated `file -> {line ->
    /// min(depth)}` map, leaving the tracer with empty buffers.
    pub fn stop(&mut self) -> HashMap<String, HashMap<u32, u32>> {
        self.state = Some(State::Idle);
        std::mem::take(&mut self.lines)
    }

    pub fn on_call(&mut self) -> CovselResult<()> {
        self.ensure_tracing()?;
        self.state_stack_len += 1;
        Ok(())
    }

    pub fn on_return(&mut self) -> CovselResult<()> {
        self.ensure_tracing()?;
        self.state_stack_len = self.state_stack_len.saturating_sub(1);
        Ok(())
    }

    /// An exception popped zero or more frames at once; restore the stack
    /// to match the frame the runtime says it landed in.
    pub fn on_unwind_to(&mut self, depth: usize) -> CovselResult<()> {
        self.ensure_tracing()?;
        self.state_stack_len = depth;
        Ok(())
    }

    pub fn on_line(&mut self, file: &str, line: u32) -> CovselResult<()> {
        self.ensure_tracing()?;
        let depth = self.state_stack_len as u32;
        let entry = self.lines.entry(file.to_owned()).or_default();
        entry
            .entry(line)
            .and_modify(|d| *d = (*d).min(depth))
            .or_insert(depth);
        Ok(())
    }

    fn ensure_tracing(&self) -> CovselResult<()> {
        if self.is_tracing() {
            Ok(())
        } else {
            Err(CovselError::TracerIdle)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle_and_rejects_events() {
        let mut tracer = Tracer::new();
        assert!(!tracer.is_tracing());
        assert!(matches!(tracer.on_line("f.src", 1), Err(CovselError::TracerIdle)));
    }

    #[test]
    fn keeps_minimum_depth_per_line() {
        let mut tracer = Tracer::new();
        tracer.start();
        tracer.on_line("f.src", 10).unwrap();
        tracer.on_call().unwrap();
        tracer.on_line("f.src", 10).unwrap();
        tracer.on_return().unwrap();

        let lines = tracer.stop();
        assert_eq!(lines["f.src"][&10], 0);
    }

    #[test]
    fn exception_unwind_restores_depth() {
        let mut tracer = Tracer::new();
        tracer.start();
        tracer.on_call().unwrap();
        tracer.on_call().unwrap();
        tracer.on_call().unwrap();
        tracer.on_unwind_to(1).unwrap();
        tracer.on_line("f.src", 5).unwrap();

        let lines = tracer.stop();
        assert_eq!(lines["f.src"][&5], 1);
    }

    #[test]
    fn stop_flushes_and_clears() {
        let mut tracer = Tracer::new();
        tracer.start();
        tracer.on_line("f.src", 1).unwrap();
        let first = tracer.stop();
        assert_eq!(first.len(), 1);

        tracer.start();
        let second_state = tracer.on_line("f.src", 1);
        assert!(second_state.is_ok());
    }
}
