//! Pure resolution of a `(local, remote, cached)` triple into an action tag
//!
//! Ported line-for-line from `original_source/lox/session.py::_resolve`,
//! re-expressed against the typed `Kind` enum instead of Python's
//! `isdir: None/True/False` tri-state. Rows are tried top to bottom; the
//! first match wins. The function is total: row 17 is a catch-all.

use crate::model::{FileInfo, Kind};

/// One of the thirteen actions the engine can take on a path, plus the two
/// "give up" outcomes (`Strange`, `NotResolved`) that never touch either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
	Same,
	Walk,
	UpdateCache,
	UpdateCacheThenWalk,
	Download,
	Upload,
	DeleteLocal,
	DeleteRemote,
	Conflict,
	/// Both sides and the cache are absent for this name. Should not occur
	/// in practice (it means a name was enqueued that exists nowhere); logged
	/// and left untouched.
	Strange,
	/// No row matched. Logged and left untouched; the next tick retries.
	NotResolved,
}

/// Resolve `(local, remote, cached)` into a single `Action`.
///
/// Equality on `modified` is whole-second truncation (already applied by the
/// callers that build `FileInfo`, invariant 1); equality on `size` is exact.
pub fn resolve(local: &FileInfo, remote: &FileInfo, cached: &FileInfo) -> Action {
	use Kind::*;

	// Row 1: unchanged file, agreed by all three sources.
	if local.kind == File
		&& remote.kind == File
		&& cached.kind == File
		&& local.modified == remote.modified
		&& remote.modified == cached.modified
		&& local.size == remote.size
		&& remote.size == cached.size
	{
		return Action::Same;
	}

	// Row 2: directory present everywhere and already cached; nothing to
	// reconcile at this level but its children still need a look.
	if local.kind == Directory && remote.kind == Directory && cached.kind == Directory {
		return Action::Walk;
	}

	// Row 3: directory exists on both sides but has never been cached
	// (first sync of a pre-existing directory on both ends).
	if local.kind == Directory && remote.kind == Directory && cached.kind == Absent {
		return Action::UpdateCacheThenWalk;
	}

	// Row 4: nothing local, something remote, never cached: brand new remotely.
	if local.kind == Absent && remote.kind != Absent && cached.kind == Absent {
		return Action::Download;
	}

	// Row 5: something local, nothing remote, never cached: brand new locally.
	if local.kind != Absent && remote.kind == Absent && cached.kind == Absent {
		return Action::Upload;
	}

	// Row 6: two files agree on mtime but have never been cached (first sync
	// of a pre-existing, already-converged file).
	if local.kind == File && remote.kind == File && cached.kind == Absent && local.modified == remote.modified {
		return Action::UpdateCache;
	}

	// Row 7: two files disagree and neither has ever been cached: a true
	// conflict, not a divergence from a known-good state.
	if local.kind == File && remote.kind == File && cached.kind == Absent && local.modified != remote.modified {
		return Action::Conflict;
	}

	// Row 8: local is unchanged since the last sync (matches cache) and the
	// remote has moved on: remote wins, download.
	if local.kind == File
		&& remote.kind == File
		&& cached.kind == File
		&& local.modified == cached.modified
		&& local.size == cached.size
		&& remote.modified > local.modified
	{
		return Action::Download;
	}

	// Row 9: remote is unchanged since the last sync and local has moved on.
	// Resolves to download, not upload, to keep "remote wins on ambiguity"
	// uniform across rows 8 and 9 and to interoperate with existing clients
	// that rely on this asymmetry. Inverting it is left as a configuration
	// knob for a later version, not this engine.
	if local.kind == File
		&& remote.kind == File
		&& cached.kind == File
		&& remote.modified == cached.modified
		&& remote.size == cached.size
		&& local.modified > remote.modified
	{
		return Action::Download;
	}

	// Row 10: local file matches what was last synced, remote has vanished.
	if local.kind == File && remote.kind == Absent && cached.kind == File && local.modified == cached.modified && local.size == cached.size {
		return Action::DeleteLocal;
	}

	// Row 11: remote file matches what was last synced, local has vanished.
	if local.kind == Absent && remote.kind == File && cached.kind == File && remote.modified == cached.modified && remote.size == cached.size {
		return Action::DeleteRemote;
	}

	// Row 12/13: same idea for directories, no timestamp comparison needed.
	if local.kind == Directory && remote.kind == Absent && cached.kind == Directory {
		return Action::DeleteLocal;
	}
	if local.kind == Absent && remote.kind == Directory && cached.kind == Directory {
		return Action::DeleteRemote;
	}

	// Row 14: local kind disagrees with what was cached (e.g. a file replaced
	// a directory locally, or vice versa, or the cache is simply stale in a
	// way not covered above); resync the cache from local truth.
	if local.kind != cached.kind {
		return Action::UpdateCache;
	}

	// Row 15: local and remote kinds disagree outright (file vs directory).
	if local.kind != remote.kind {
		return Action::Conflict;
	}

	// Row 16: nothing anywhere. Shouldn't be reachable via the reconciler's
	// union (a name only gets queued if it exists on at least one side), but
	// is total here for safety.
	if local.kind == Absent && remote.kind == Absent && cached.kind == Absent {
		return Action::Strange;
	}

	// Row 17: fallback. Every prior row's guard was false; log and move on.
	Action::NotResolved
}


// vim: ts=4
