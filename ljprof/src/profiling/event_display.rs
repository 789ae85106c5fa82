//! Text rendering of Lua frames, streamed events and processing statistics.

use crate::aggregator::StackBacktrace;
use crate::domain::{Pid, Tid};
use ljprof_common::{FrameDisplay, LuaFrameEvent, ResolvedFrame};

/// Label of a Lua frame as used in folded stacks.
///
/// Chunk names lose LuaJIT's `@` (file) / `=` (literal) prefix.
#[must_use]
pub fn lua_frame_label(frame: &ResolvedFrame) -> String {
    match frame.display() {
        FrameDisplay::Source { chunk, line } => {
            let chunk = chunk.strip_prefix(b"@").or_else(|| chunk.strip_prefix(b"=")).unwrap_or(chunk);
            format!("{}:{line}", String::from_utf8_lossy(chunk))
        }
        FrameDisplay::Native { addr } => format!("C:0x{addr:x}"),
        FrameDisplay::Builtin { ffid } => format!("builtin#{ffid}"),
        FrameDisplay::Unresolved => "?".to_string(),
    }
}

/// Labels of a backtrace, outermost first. Missing levels render as `?`.
#[must_use]
pub fn backtrace_labels(backtrace: &StackBacktrace) -> Vec<String> {
    backtrace
        .frames()
        .iter()
        .rev()
        .map(|slot| slot.as_ref().map_or_else(|| "?".to_string(), lua_frame_label))
        .collect()
}

/// One line per streamed frame event (`--stream`)
#[must_use]
pub fn format_frame_event(event: &LuaFrameEvent) -> String {
    format!(
        "[LUA] {} {} stack={} #{} {}",
        Pid(event.pid),
        Tid(event.tid),
        event.stack_id,
        event.frame.level,
        lua_frame_label(&event.frame)
    )
}

/// Print a streamed frame event
pub fn display_frame_event(event: &LuaFrameEvent) {
    println!("{}", format_frame_event(event));
}

/// Counters kept by the event processor
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorStats {
    pub events: u64,
    pub truncated: u64,
    pub invalid_stack: u64,
    pub depth_exceeded: u64,
    pub stream_dropped: u64,
}

/// Display processing statistics
pub fn display_statistics(stats: &ProcessorStats, stacks: usize) {
    eprintln!(
        "stats: frame_events={} stacks={} truncated={} invalid_stack={} depth_exceeded={} stream_dropped={}",
        stats.events,
        stacks,
        stats.truncated,
        stats.invalid_stack,
        stats.depth_exceeded,
        stats.stream_dropped
    );
}

/// Display progress for a bounded run
pub fn display_progress(elapsed_secs: u64, duration: u64, remaining_secs: u64) {
    use std::io::Write;
    eprint!("\r   Progress: {elapsed_secs}s / {duration}s ({remaining_secs}s remaining)   ");
    std::io::stderr().flush().ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lua_labels() {
        assert_eq!(lua_frame_label(&ResolvedFrame::lua(0, b"@/app/handler.lua", 12)), "/app/handler.lua:12");
        assert_eq!(lua_frame_label(&ResolvedFrame::lua(0, b"=content_by_lua(nginx.conf:40)", 0)), "content_by_lua(nginx.conf:40):0");
        assert_eq!(lua_frame_label(&ResolvedFrame::lua(0, b"return 1", 1)), "return 1:1");
        assert_eq!(lua_frame_label(&ResolvedFrame::native(0, 0x5555_0000)), "C:0x55550000");
        assert_eq!(lua_frame_label(&ResolvedFrame::builtin(0, 21)), "builtin#21");
        assert_eq!(lua_frame_label(&ResolvedFrame::unresolved(0)), "?");
    }

    #[test]
    fn test_stream_line_names_process_and_thread() {
        let event = LuaFrameEvent { pid: 812, tid: 815, stack_id: 3, frame: ResolvedFrame::lua(1, b"@/app/db.lua", 40) };
        assert_eq!(format_frame_event(&event), "[LUA] PID:812 TID:815 stack=3 #1 /app/db.lua:40");
    }
}
