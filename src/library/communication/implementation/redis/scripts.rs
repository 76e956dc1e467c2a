//! Lua scripts for operations that have to be atomic on the redis side
//!
//! Scripts are loaded lazily and invoked by their hash, falling back to sending the
//! full source if the server does not know them yet.

use lazy_static::lazy_static;
use redis::Script;

lazy_static! {
    /// Pushes a record unless its content hash is already known
    ///
    /// KEYS: ready list, hash table
    /// ARGV: content hash, record, wake channel
    ///
    /// Returns `1` if the record has been added, `0` if it was a duplicate.
    pub static ref ENQUEUE_UNIQUE: Script = Script::new(
        r"
        if redis.call('HSETNX', KEYS[2], ARGV[1], 1) == 0 then
            return 0
        end
        redis.call('LPUSH', KEYS[1], ARGV[2])
        redis.call('PUBLISH', ARGV[3], '')
        return 1
        "
    );

    /// Removes a claimed record and releases its content hash
    ///
    /// The hash is kept if the record is no longer in flight, since a recovered copy of it
    /// may be waiting in the ready list.
    ///
    /// KEYS: processing list, hash table
    /// ARGV: record, content hash (empty if unknown)
    ///
    /// Returns `1` if the record was still in flight, `0` otherwise.
    pub static ref COMPLETE: Script = Script::new(
        r"
        if redis.call('LREM', KEYS[1], 1, ARGV[1]) == 0 then
            return 0
        end
        if ARGV[2] ~= '' then
            redis.call('HDEL', KEYS[2], ARGV[2])
        end
        return 1
        "
    );

    /// Moves a claimed record back to the consuming end of the ready list
    ///
    /// KEYS: processing list, ready list
    /// ARGV: record, wake channel
    ///
    /// Returns `1` if the record was still in flight, `0` otherwise.
    pub static ref WITHDRAW: Script = Script::new(
        r"
        if redis.call('LREM', KEYS[1], 1, ARGV[1]) == 0 then
            return 0
        end
        redis.call('RPUSH', KEYS[2], ARGV[1])
        redis.call('PUBLISH', ARGV[2], '')
        return 1
        "
    );

    /// Replaces a claimed record with a re-stamped copy at the end of the ready list
    ///
    /// KEYS: processing list, ready list
    /// ARGV: claimed record, refreshed record, wake channel
    ///
    /// Returns `1` if the record was still in flight, `0` otherwise.
    pub static ref RETRY: Script = Script::new(
        r"
        if redis.call('LREM', KEYS[1], 1, ARGV[1]) == 0 then
            return 0
        end
        redis.call('LPUSH', KEYS[2], ARGV[2])
        redis.call('PUBLISH', ARGV[3], '')
        return 1
        "
    );

    /// Returns all claimed records to the consuming end of the ready list
    ///
    /// The oldest claim ends up first in line.
    ///
    /// KEYS: processing list, ready list
    /// ARGV: wake channel
    ///
    /// Returns the number of recovered records.
    pub static ref RECOVER: Script = Script::new(
        r"
        local records = redis.call('LRANGE', KEYS[1], 0, -1)
        for _, record in ipairs(records) do
            redis.call('RPUSH', KEYS[2], record)
        end
        redis.call('DEL', KEYS[1])
        if #records > 0 then
            redis.call('PUBLISH', ARGV[1], '')
        end
        return #records
        "
    );
}
