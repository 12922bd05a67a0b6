/*
  cabinet-sentry, a telecom/battery cabinet supervisory controller.
  Copyright (C) 2024 The cabinet-sentry Authors.

  cabinet-sentry is free software: you can redistribute it and/or modify
  it under the terms of the GNU General Public License as published by
  the Free Software Foundation, either version 3 of the License, or
  (at your option) any later version.

  cabinet-sentry is distributed in the hope that it will be useful,
  but WITHOUT ANY WARRANTY; without even the implied warranty of
  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
  GNU General Public License for more details.

  You should have received a copy of the GNU General Public License
  along with this program.  If not, see <http://www.gnu.org/licenses/>.
*/

use cabinet_sentry::runtime::Dummy;
use cabinet_sentry::CabinetError;

/// A dummy main function for `cabinet-sentry`.
///
/// Hardware is substituted for in-memory stand-ins so the controller can run off real hardware,
/// e.g. in CI or on a developer's machine.
///
/// # Arguments
///
/// The first argument to this executable (via `std::env::args`) is the path to a configuration
/// JSON file.
///
/// The second argument is a path to a directory where log files should be created. If the
/// directory does not exist, it will be created.
fn main() -> Result<(), CabinetError> {
    cabinet_sentry::runtime::run::<Dummy>()
}
