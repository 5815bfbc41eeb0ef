//-
// Copyright (c) 2021, Jason Lingle
//
// This file is part of Mockmap.
//
// Mockmap is free software: you can  redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published  by the Free
// Software Foundation, either version 3 of  the License, or (at your option)
// any later version.
//
// Mockmap is distributed  in the hope that  it will be useful,  but WITHOUT
// ANY WARRANTY; without even  the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along
// with Mockmap. If not, see <http://www.gnu.org/licenses/>.

pub mod error;
pub mod file_ops;
pub mod safe_name;
pub mod system_config;
