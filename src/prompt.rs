/*
 * Copyright 2025 Luc Lenôtre
 *
 * This file is part of Maestro.
 *
 * Maestro is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Maestro is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Maestro. If not, see <https://www.gnu.org/licenses/>.
 */

//! Line prompting for the interactive shell.

use libc::{ECHO, ECHOE, ICANON, STDIN_FILENO, TCSANOW, VMIN, tcgetattr, tcsetattr, termios};
use std::io::{BufRead, Write};
use std::mem::MaybeUninit;
use std::{fmt, io};

/// Shows `prompt`, then reads one line from stdin.
///
/// Returns `None` when stdin reaches end-of-file.
pub fn read_line<P: fmt::Display>(prompt: P) -> Option<String> {
    print!("{prompt}");
    let _ = io::stdout().flush();
    let input = io::stdin().lock().lines().next()?.unwrap_or_default();
    Some(input)
}

/// Shows `prompt`, then reads one line with terminal echo disabled. Used for
/// passwords. The terminal state is restored before returning.
pub fn read_secret<P: fmt::Display>(prompt: P) -> Option<String> {
    let saved = unsafe {
        let mut t: termios = MaybeUninit::zeroed().assume_init();
        tcgetattr(STDIN_FILENO, &mut t);
        t
    };
    let mut hidden = saved;
    hidden.c_lflag &= !(ICANON | ECHO | ECHOE);
    hidden.c_cc[VMIN] = 1;
    unsafe {
        tcsetattr(STDIN_FILENO, TCSANOW, &hidden);
    }
    let input = read_line(prompt);
    // Restore the terminal before anything else, even on EOF
    unsafe {
        tcsetattr(STDIN_FILENO, TCSANOW, &saved);
    }
    println!();
    input
}
